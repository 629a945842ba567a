//! csvbook - Streaming CSV-to-XLSX workbook builder with blob storage and SharePoint delivery
//!
//! This crate combines a set of CSV files into a single Excel workbook (one worksheet
//! per CSV) and delivers the result as an HTTP attachment, to Azure Blob Storage, or to
//! a SharePoint document library through a chunked upload session.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::fs::File;
//! use csvbook::{SourceRecord, WorkbookBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create a converter with default settings
//!     let converter = WorkbookBuilder::new().build()?;
//!
//!     // Each CSV becomes one worksheet, named after the file
//!     let workbook = converter.convert(vec![
//!         SourceRecord::new("jan.csv", File::open("jan.csv")?),
//!         SourceRecord::new("feb.csv", File::open("feb.csv")?),
//!     ])?;
//!
//!     std::fs::write("merged.xlsx", workbook.into_bytes()?)?;
//!     Ok(())
//! }
//! ```
//!
//! # Custom Configuration
//!
//! ```rust,no_run
//! use csvbook::{Staging, WorkbookBuilder, WorkbookLimits};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = WorkbookBuilder::new()
//!         .with_delimiter(b';')                  // Semicolon separated input
//!         .with_staging(Staging::TempFile)       // Stage large workbooks on disk
//!         .with_limits(WorkbookLimits {
//!             max_rows: 100_000,
//!             ..WorkbookLimits::default()
//!         })
//!         .build()?;
//!
//!     let mut writer = converter.writer()?;
//!     writer.append_csv("report.csv", "a;b\n1;2\n".as_bytes())?;
//!     let workbook = writer.finish()?;
//!     println!("{} bytes", workbook.len());
//!     Ok(())
//! }
//! ```
//!
//! # Uploading
//!
//! ```rust,no_run
//! use csvbook::{GraphDriveTarget, ResumableUploadClient, WorkbookBuilder};
//!
//! # async fn run() -> Result<(), csvbook::CsvBookError> {
//! let workbook = WorkbookBuilder::new().build()?.convert(Vec::<csvbook::SourceRecord<&[u8]>>::new())?;
//! let target = GraphDriveTarget::new("site-id", "drive-id", "Reports");
//!
//! let length = workbook.len();
//! let result = ResumableUploadClient::new(reqwest::Client::new())
//!     .upload(
//!         workbook.into_async_reader(),
//!         length,
//!         "merged.xlsx",
//!         &target.item_endpoint("merged.xlsx"),
//!         "access-token",
//!     )
//!     .await?;
//! println!("{}", result.destination_url);
//! # Ok(())
//! # }
//! ```

mod api;
mod auth;
mod builder;
mod config;
mod error;
mod orchestrator;
mod pipeline;
mod request;
mod secrets;
mod security;
mod selection;
mod sheet_name;
mod storage;
mod types;
mod upload;
mod writer;

pub mod server;

// 公開API
pub use api::{ConflictBehavior, Staging};
pub use auth::{ClientCredentials, StaticToken, TokenProvider, DEFAULT_AUTHORITY, GRAPH_DEFAULT_SCOPE};
pub use builder::{CsvConverter, FinishedWorkbook, WorkbookBuilder, WorkbookReader, WorkbookWriter};
pub use config::{AppConfig, ClientSecretSettings, DriveSettings};
pub use error::{CsvBookError, ErrorKind};
pub use orchestrator::{
    InstanceStatus, Orchestrator, RuntimeStatus, DEFAULT_MAX_INSTANCES, DEFAULT_RETENTION,
};
pub use pipeline::{BlobDestination, CombinedWorkbook, ReportPipeline, SharePointTarget};
pub use request::{keys, parse_date, ConvertRequest, OrchestrationRequest, RequestFields};
pub use secrets::{EnvSecrets, KeyVaultSecrets, SecretStore, KEY_VAULT_SCOPE};
pub use security::{WorkbookLimits, EXCEL_MAX_CELL_CHARS, EXCEL_MAX_COLUMNS, EXCEL_MAX_ROWS};
pub use selection::{file_name, folder_label, is_csv_name, SourceSelection};
pub use sheet_name::{
    sanitize_sheet_name, strip_extension, SheetNamer, INVALID_SHEET_CHARS, MAX_SHEET_NAME_LEN,
};
pub use storage::{
    AzureBlobStore, BlobItem, BlobReader, BlobStore, MemoryBlobStore, StorageCredentials,
};
pub use types::{SheetEntry, SourceRecord, UploadResult, UploadSession, XLSX_CONTENT_TYPE};
pub use upload::{
    DirectUploader, GraphDriveTarget, ResumableUploadClient, RetryPolicy, CHUNK_ALIGNMENT,
    DEFAULT_CHUNK_SIZE, GRAPH_BASE_URL,
};
