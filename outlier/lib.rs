#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod aggregate;
pub mod cat;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod filter;
pub mod frame;
pub mod io;
pub mod prediction;
pub mod result;
pub mod score;

pub use error::{ModelError, OutlierError, Result};
pub use frame::IndexedFrame;
pub use result::{SpliceOutlierResult, ViewName};
