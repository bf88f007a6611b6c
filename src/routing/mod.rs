pub mod hash_ring;
pub mod router;

pub use router::Router;
