//! drivemedia CLI - Import Google Drive images into a media library.
//!
//! This tool connects a Google account through OAuth, browses Drive folders
//! and copies images into a local media repository.

mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use drivemedia_common::{DriveId, DriveLink};
use drivemedia_drive::{
    DriveClient, DriveOptions, Endpoints, JsonFileStore, SettingsStore, TokenStore,
    DEFAULT_REDIRECT_URL,
};
use drivemedia_import::{
    BatchEvent, BatchImporter, ImportPipeline, ImportResult, LocalRepository, PipelineOptions,
};

use server::ServerState;

#[derive(Parser)]
#[command(name = "drivemedia")]
#[command(about = "drivemedia - Google Drive image import")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Settings file (default: user config directory).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// OAuth redirect URI registered for the client.
    #[arg(long, global = true, default_value = DEFAULT_REDIRECT_URL)]
    redirect_uri: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the Google API client credentials.
    Configure {
        /// OAuth client id.
        #[arg(long)]
        client_id: String,

        /// OAuth client secret.
        #[arg(long)]
        client_secret: String,
    },

    /// Show configuration and connection state.
    Status,

    /// Connect a Google account through the browser.
    Connect {
        /// Print the consent URL instead of opening a browser.
        #[arg(long)]
        no_browser: bool,

        /// Address of the callback server.
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },

    /// Exchange an authorization code obtained manually.
    Authorize {
        /// Authorization code from the consent redirect.
        #[arg(long)]
        code: String,
    },

    /// Forget the stored credential.
    Disconnect,

    /// List the images in a Drive folder.
    List {
        /// Folder link or id.
        folder: String,
    },

    /// Import Drive files and folders into the media directory.
    Import {
        /// File links, folder links or file ids.
        links: Vec<String>,

        /// Read additional links from a file, one per line.
        #[arg(short, long)]
        from_file: Option<PathBuf>,

        /// Media repository directory.
        #[arg(short, long, default_value = "media")]
        media_dir: PathBuf,

        /// Public URL the media directory is served under.
        #[arg(short, long, default_value = "/media")]
        base_url: String,

        /// Directory for temporary downloads.
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Owner recorded with each imported asset.
        #[arg(long)]
        owner: Option<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Save a file's Drive thumbnail.
    Thumbnail {
        /// File id.
        file_id: String,

        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run the OAuth callback and thumbnail proxy server.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings_path = match &cli.settings {
        Some(path) => path.clone(),
        None => JsonFileStore::default_path().context("No config directory available")?,
    };
    let app = App::new(settings_path, cli.redirect_uri);

    match cli.command {
        Commands::Configure {
            client_id,
            client_secret,
        } => cmd_configure(&app, &client_id, &client_secret).await,

        Commands::Status => cmd_status(&app).await,

        Commands::Connect { no_browser, bind } => cmd_connect(&app, no_browser, bind).await,

        Commands::Authorize { code } => cmd_authorize(&app, &code).await,

        Commands::Disconnect => cmd_disconnect(&app).await,

        Commands::List { folder } => cmd_list(&app, &folder).await,

        Commands::Import {
            links,
            from_file,
            media_dir,
            base_url,
            temp_dir,
            owner,
            json,
        } => {
            let options = PipelineOptions { temp_dir, owner };
            cmd_import(&app, links, from_file.as_deref(), &media_dir, &base_url, options, json)
                .await
        }

        Commands::Thumbnail { file_id, output } => cmd_thumbnail(&app, &file_id, &output).await,

        Commands::Serve { bind } => cmd_serve(&app, bind).await,
    }
}

/// Settings location and connection parameters shared by all commands.
struct App {
    settings: Arc<JsonFileStore>,
    redirect_uri: String,
    endpoints: Endpoints,
    options: DriveOptions,
}

impl App {
    fn new(settings_path: PathBuf, redirect_uri: String) -> Self {
        Self {
            settings: Arc::new(JsonFileStore::new(settings_path)),
            redirect_uri,
            endpoints: Endpoints::default(),
            options: DriveOptions::default(),
        }
    }

    /// Open the Drive client and its token store from the stored settings.
    async fn open(&self) -> Result<Arc<DriveClient>> {
        let http = self
            .options
            .http_client()
            .context("Failed to create HTTP client")?;
        let tokens = TokenStore::open(
            self.settings.clone(),
            &self.redirect_uri,
            &self.endpoints,
            http.clone(),
        )
        .await
        .context("Failed to load settings")?;
        Ok(Arc::new(DriveClient::new(
            Arc::new(tokens),
            &self.endpoints,
            http,
            self.options.clone(),
        )))
    }

    /// Like [`App::open`], but fail early when no client is configured.
    async fn open_configured(&self) -> Result<Arc<DriveClient>> {
        let drive = self.open().await?;
        if !drive.tokens().is_configured() {
            anyhow::bail!(
                "Client credentials are not configured. Run `drivemedia configure` first"
            );
        }
        Ok(drive)
    }
}

/// Store client credentials.
async fn cmd_configure(app: &App, client_id: &str, client_secret: &str) -> Result<()> {
    if client_id.trim().is_empty() || client_secret.trim().is_empty() {
        anyhow::bail!("Client id and secret cannot be empty");
    }

    app.settings
        .save_client(client_id, client_secret)
        .await
        .context("Failed to save settings")?;

    println!("Client credentials saved to {}", app.settings.path().display());
    println!("  Redirect URI: {}", app.redirect_uri);

    Ok(())
}

/// Show configuration and connection state.
async fn cmd_status(app: &App) -> Result<()> {
    let drive = app.open().await?;
    let tokens = drive.tokens();

    println!("Settings: {}", app.settings.path().display());
    if tokens.is_configured() {
        let config = tokens.config();
        println!("  Configured: yes");
        println!("  Client id: {}", config.client_id.as_str());
        println!("  Redirect URI: {}", config.redirect_uri.as_str());
    } else {
        println!("  Configured: no");
    }
    if tokens.is_connected().await {
        println!("  Connected: yes");
        if let Some(expires_at) = tokens.expires_at().await {
            println!("  Access token expires: {}", expires_at);
        }
    } else {
        println!("  Connected: no");
    }

    Ok(())
}

/// Connect through the browser and the local callback server.
async fn cmd_connect(app: &App, no_browser: bool, bind: SocketAddr) -> Result<()> {
    let drive = app.open_configured().await?;

    let state_token = Uuid::new_v4().to_string();
    let url = drive.tokens().authorization_url_with_state(&state_token);
    let (state, completion) = ServerState::new(drive, state_token);

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind callback server to {}", bind))?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(listener, state, async move {
        let _ = stop_rx.await;
    }));

    println!("Open this URL to grant access:\n\n  {}\n", url);
    if !no_browser {
        if let Err(e) = open::that(url.as_str()) {
            warn!("Could not open a browser: {}", e);
        }
    }
    println!("Waiting for the authorization callback...");

    let outcome = completion.await;
    let _ = stop_tx.send(());
    server
        .await
        .context("Callback server task failed")?
        .context("Callback server failed")?;

    match outcome {
        Ok(Ok(())) => {
            info!("Connected to Google Drive");
            println!("Connected to Google Drive.");
            Ok(())
        }
        Ok(Err(message)) => anyhow::bail!("Authorization failed: {}", message),
        Err(_) => anyhow::bail!("Callback server stopped before authorization completed"),
    }
}

/// Exchange a manually obtained authorization code.
async fn cmd_authorize(app: &App, code: &str) -> Result<()> {
    let drive = app.open_configured().await?;

    drive
        .tokens()
        .complete_authorization(code.trim())
        .await
        .context("Failed to exchange authorization code")?;

    println!("Connected to Google Drive.");
    Ok(())
}

/// Forget the stored credential.
async fn cmd_disconnect(app: &App) -> Result<()> {
    let drive = app.open().await?;

    drive
        .tokens()
        .disconnect().await.context("Failed to disconnect")?;

    println!("Disconnected.");
    Ok(())
}

/// List the images in a folder.
async fn cmd_list(app: &App, folder: &str) -> Result<()> {
    let folder_id = DriveLink::folder_id(folder).context("Invalid folder link or id")?;
    let drive = app.open_configured().await?;

    let files = drive
        .list_folder_images(&folder_id)
        .await
        .context("Failed to list folder")?;

    if files.is_empty() {
        println!("Folder has no images.");
    } else {
        println!("Images in {}:", folder_id);
        for file in &files {
            let size_str = file.size.map(|s| format!("{} bytes", s)).unwrap_or_default();
            println!("  {}  {} [{}] {}", file.id, file.name, file.mime_type, size_str);
        }
        println!("{} image(s)", files.len());
    }

    Ok(())
}

/// Resolve links and import every file.
async fn cmd_import(
    app: &App,
    mut links: Vec<String>,
    from_file: Option<&Path>,
    media_dir: &Path,
    base_url: &str,
    options: PipelineOptions,
    json: bool,
) -> Result<()> {
    if let Some(path) = from_file {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        links.extend(content.lines().map(str::to_string));
    }
    if links.is_empty() {
        anyhow::bail!("Nothing to import. Pass links or --from-file");
    }

    let drive = app.open_configured().await?;
    let repository = LocalRepository::new(media_dir, base_url)
        .with_context(|| format!("Failed to open media directory {}", media_dir.display()))?;
    info!("Importing into {}", repository.root().display());
    let pipeline = Arc::new(ImportPipeline::new(drive, Arc::new(repository), options));
    let importer = BatchImporter::new(pipeline);

    let mut progress = |event: BatchEvent<'_>| print_event(event);
    let ids = importer
        .resolve(links.iter().map(String::as_str), &mut progress)
        .await;
    if ids.is_empty() {
        anyhow::bail!("No importable files found");
    }

    let report = importer.run(&ids, &mut progress).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    println!("{}/{} imported", report.succeeded(), report.total());

    if report.failed().any(|e| match &e.result {
        ImportResult::Failed { kind, .. } => kind.is_auth(),
        ImportResult::Imported { .. } => false,
    }) {
        println!(
            "Some files failed for lack of a valid Google connection. Run `drivemedia connect`"
        );
    }

    if report.succeeded() < report.total() {
        anyhow::bail!("{} import(s) failed", report.total() - report.succeeded());
    }
    Ok(())
}

fn print_event(event: BatchEvent<'_>) {
    match event {
        BatchEvent::UnrecognizedLine { line } => println!("Skipping unrecognized input: {}", line),
        BatchEvent::FolderListed { folder_id, count } => {
            println!("Folder {}: {} image(s)", folder_id, count)
        }
        BatchEvent::FolderEmpty { folder_id } => println!("Folder {} has no images", folder_id),
        BatchEvent::FolderFailed { folder_id, error } => {
            println!("Folder {} could not be listed: {}", folder_id, error)
        }
        BatchEvent::Started {
            file_id,
            index,
            total,
        } => println!("[{}/{}] {}", index + 1, total, file_id),
        BatchEvent::Finished { result, .. } => match result {
            ImportResult::Imported { filename, url, .. } => {
                println!("  imported {} -> {}", filename, url)
            }
            ImportResult::Failed { kind, message } => println!("  failed ({}): {}", kind, message),
        },
    }
}

/// Save a thumbnail to disk.
async fn cmd_thumbnail(app: &App, file_id: &str, output: &Path) -> Result<()> {
    let file_id = DriveId::new(file_id).context("Invalid file id")?;
    let drive = app.open_configured().await?;

    let thumb = drive
        .thumbnail(&file_id)
        .await
        .context("Failed to fetch thumbnail")?;

    tokio::fs::write(output, &thumb.body)
        .await
        .context("Failed to write output file")?;

    println!(
        "Thumbnail saved: {} ({}, {} bytes)",
        output.display(),
        thumb.content_type,
        thumb.body.len()
    );
    Ok(())
}

/// Run the operator server until interrupted.
async fn cmd_serve(app: &App, bind: SocketAddr) -> Result<()> {
    let drive = app.open_configured().await?;

    let state_token = Uuid::new_v4().to_string();
    let url = drive.tokens().authorization_url_with_state(&state_token);
    let (state, _completion) = ServerState::new(drive, state_token);

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;

    println!("Consent URL for this session:\n\n  {}\n", url);
    println!("Thumbnails: http://{}/thumbnail/<file id>", bind);

    server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("Server failed")?;

    info!("Server stopped");
    Ok(())
}
