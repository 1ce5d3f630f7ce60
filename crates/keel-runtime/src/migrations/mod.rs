mod changeset;
mod phase;
mod runner;
mod store;
mod tracker;

pub use changeset::{load_change_sets, sequence_gaps, validate_sequence, ChangeSet, ChangeSetId};
pub use phase::MigrationPhase;
pub use runner::{
    Confirm, FixedAnswer, MigrationOutcome, MigrationReport, MigrationStatus, Migrator,
};
pub use store::{MigrationStore, PgStore, RecordMode};
pub use tracker::{AppliedRecord, Tracker};
