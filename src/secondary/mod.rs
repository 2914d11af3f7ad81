//! Simpler single-threaded variants. Only `RobinhoodMap`
//! ships; `QuadMap`/`FastMap`/`BlitzMap` are alternate open-addressing
//! policies over the same idea and are not needed alongside it.

mod robinhood;

pub use robinhood::RobinhoodMap;
