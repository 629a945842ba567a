use std::sync::Arc;

use csvbook::server::{self, ApiKey, AppState};
use csvbook::{
    AppConfig, AzureBlobStore, BlobDestination, ClientCredentials, CsvBookError, EnvSecrets,
    GraphDriveTarget, KeyVaultSecrets, Orchestrator, ReportPipeline, ResumableUploadClient,
    SecretStore, SharePointTarget, TokenProvider, WorkbookBuilder,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), CsvBookError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!(?config, "configuration loaded");
    let api_key = ApiKey::new(&config.api_key)?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let credentials: Option<Arc<dyn TokenProvider>> = config.credentials.as_ref().map(|c| {
        Arc::new(ClientCredentials::new(
            http.clone(),
            c.tenant_id.clone(),
            c.client_id.clone(),
            c.client_secret.clone(),
        )) as Arc<dyn TokenProvider>
    });

    let secrets: Arc<dyn SecretStore> = match (&config.key_vault_uri, &credentials) {
        (Some(uri), Some(tokens)) => Arc::new(KeyVaultSecrets::new(
            http.clone(),
            uri.clone(),
            Arc::clone(tokens),
        )),
        _ => Arc::new(EnvSecrets),
    };

    let store = AzureBlobStore::from_connection_string(
        http.clone(),
        &config.storage_connection_string,
    )?;
    let converter = WorkbookBuilder::new()
        .with_staging(config.staging)
        .build()?;

    let blob_destination = match &config.storage_url_secret_name {
        Some(name) => BlobDestination::SasUrl {
            container_url: secrets.get(name).await?,
        },
        None => BlobDestination::Store {
            container: config.reports_container.clone(),
        },
    };

    let mut pipeline = ReportPipeline::new(Arc::new(store), converter, http.clone())
        .with_environment(config.environment.clone())
        .with_blob_destination(blob_destination)
        .with_upload_client(
            ResumableUploadClient::new(http.clone()).with_chunk_size(config.upload_chunk_size)?,
        );

    if let (Some(drive), Some(tokens)) = (&config.drive, &credentials) {
        pipeline = pipeline.with_sharepoint(SharePointTarget::Graph {
            drive: GraphDriveTarget::new(
                drive.site_id.clone(),
                drive.drive_id.clone(),
                drive.folder_path.clone(),
            ),
            tokens: Arc::clone(tokens),
        });
    } else if let (Some(url_name), Some(token_name)) = (
        &config.sharepoint_upload_url_secret_name,
        &config.sharepoint_token_secret_name,
    ) {
        pipeline = pipeline.with_sharepoint(SharePointTarget::Direct {
            base_url: secrets.get(url_name).await?,
            token: secrets.get(token_name).await?,
        });
    }

    let pipeline = Arc::new(pipeline);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&pipeline),
        config.reports_container.clone(),
    ));
    let state = AppState::new(
        pipeline,
        orchestrator,
        config.reports_container.clone(),
        api_key,
    );

    let listener = TcpListener::bind(config.bind_address()).await?;
    server::serve(listener, state).await
}
