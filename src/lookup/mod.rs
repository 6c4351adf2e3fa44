// # Lookup Module
//
// Metadata resolution against pluggable read-only catalog backends:
//
// - **MetadataBackend**: trait every external catalog implements
// - **BackendRegistry**: explicit registry populated once at startup
// - **MetadataResolver**: digest-first query strategy + candidate ranking
// - **OpenVgdbBackend**: local sqlite catalog
// - **GamesDbBackend**: remote HTTP catalog
// - **normalize**: deterministic filename/title normalization

mod backend;
mod gamesdb;
mod openvgdb;
mod resolver;

pub mod normalize;

pub use backend::{
    BackendRegistry, LookupError, MatchKind, MetadataBackend, MetadataCandidate,
};
pub use gamesdb::GamesDbBackend;
pub use openvgdb::OpenVgdbBackend;
pub use resolver::{MetadataResolver, Resolution};
