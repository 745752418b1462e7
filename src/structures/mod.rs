pub use self::list::{List, Iter, TransIter, NodeState, INSERT_BIT, DELETE_BIT, DOUPDATE_BIT};
pub use self::config::{Compare, ListConfig, NaturalOrder};

pub mod utils;

mod config;
mod list;
