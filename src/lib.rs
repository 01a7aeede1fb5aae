pub mod aggregator;
pub mod classifier;
pub mod dataset;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod orchestrator;
pub mod pool;
pub mod scanner;

// Re-export main types for convenient access
pub use classifier::{ClassifiedLine, LineClassifier, LineForm};
pub use dataset::{ConsolidatedDataset, DataFragment};
pub use error::PipelineError;
pub use inventory::{FileInventory, VarKind, VariableCatalog, VariableDescriptor};
pub use orchestrator::{
    expand_selection, parse_directory, scan_directory, ParseOrchestrator, ParseOutcome, ParseTask,
    ScanReport, VariableGroup,
};
pub use pool::{PoolConfig, TaskFailure, WorkPool};
pub use scanner::{ScannerConfig, StatsScanner};
