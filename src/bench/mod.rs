//! The bias side of the bench: outputs, supplies, pairings, and the workbench that ties
//! them to the RF instruments and the sequence runner.

pub mod output;
pub mod pairing;
pub mod supplies;
pub mod workbench;

pub use output::{Assignment, OutputId, OutputSettings, OutputSettingsTable, Role};
pub use pairing::{Pairing, PairingEngine, PairingPool};
pub use supplies::SupplyBank;
pub use workbench::Workbench;
