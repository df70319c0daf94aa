pub mod backfill;
pub mod gate;
pub mod reorg;
pub mod reorg_handler;
pub mod supervisor;
pub mod worker;
