pub mod bloom;
pub mod cache;

pub use bloom::BloomFilter;
pub use cache::{
    CacheLookup, QueryCache, TTL_NEGATIVE, TTL_RECENT_EVENTS, TTL_STATS, TTL_TRANSACTION,
    TTL_WIDE_EVENTS,
};
