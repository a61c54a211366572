pub mod domain;
pub mod ids;
pub mod library;
pub mod memory;
pub mod package;
pub mod ports;

pub use domain::{
    Blob, Document, DocumentSummary, DocumentVariant, DomainError, Page, Poem, PoemKind,
    SourceType, VoiceNote,
};
pub use ids::{Clock, FixedClock, IdGenerator, SequentialIds, SystemClock, UuidGenerator};
pub use library::{Library, LibraryError, LibraryResult, Narration, NewAudioBook, OpenedDocument};
pub use memory::MemoryStore;
pub use package::{
    AssetKind, ExportedPackage, ImportOutcome, MissingAsset, PackageCodec, PackageError,
};
pub use ports::{DocumentStore, PortError, PortResult};
