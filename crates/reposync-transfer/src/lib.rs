#![warn(missing_docs)]

//! reposync transfer subsystem: manifest reconciliation, alien tracking, transfer receiver and transmitter

pub mod alien;
pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod processor;
pub mod progress;
pub mod receiver;
pub mod report;
pub mod requisite;
pub mod resolver;
pub mod staging;
pub mod transmitter;

pub use alien::{AlienProcessor, InvasionDelta};
pub use config::ReceiverConfig;
pub use error::TransferError;
pub use lock::TransferLock;
pub use manifest::{
    DeletedNode, ManifestHeader, ManifestNode, ManifestNodeFactory, ManifestReader, ManifestWriter,
    NormalNode,
};
pub use processor::{
    ChangeCapture, ManifestProcessor, PassDriver, PrimaryManifestProcessor,
    SecondaryManifestProcessor, TertiaryManifestProcessor, TransferContext,
};
pub use progress::{
    InMemoryProgressMonitor, LogEntry, ProgressMonitor, TransferId, TransferProgress,
    TransferStatus,
};
pub use receiver::{TransferListener, TransferReceiver};
pub use report::{JsonReportWriter, ReportEvent, ReportWriter};
pub use requisite::{
    is_content_missing, MissingContent, RequisiteProcessor, RequisiteWriter, VecRequisiteWriter,
};
pub use resolver::{
    BasicCorrespondingNodeResolver, CachingCorrespondingNodeResolver, CorrespondingNodeResolver,
    ResolvedParentChildPair,
};
pub use staging::StagingArea;
pub use transmitter::{
    build_manifest, transfer, InProcessTransmitter, TransferDefinition, TransferOutcome,
    Transmitter,
};
