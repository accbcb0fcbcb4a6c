use std::sync::Arc;

use courier::auth::*;
use courier::logger::*;
use courier::settings::*;
use courier::storage::*;
use courier::transport::*;

// Demonstrates the refresh-coordinated client against a scripted
// transport: the first call 401s, one refresh runs, the call is replayed
// with the rotated token.
//
// $ cargo run --bin client_demo -- --settings=settings/dev.toml
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    info!(?project_settings);
    logger.reload_filter(&project_settings.log.filter)?;

    let store: Arc<dyn KeyValueStore> = match project_settings.store.backend.as_str() {
        "file" => Arc::new(FileStore::open(&project_settings.store.path)?),
        _ => Arc::new(MemoryStore::new()),
    };

    let base = project_settings.api.base_url.clone();
    let transport = Arc::new(FakeTransport::new());
    transport.script(
        Method::Get,
        &format!("{}/users/me", base),
        FakeOutcome::status(401, ""),
    );
    transport.script(
        Method::Post,
        &format!("{}{}", base, project_settings.api.refresh_path),
        FakeOutcome::ok(r#"{"accessToken":"T2","refreshToken":"R2"}"#),
    );
    transport.script(
        Method::Get,
        &format!("{}/users/me", base),
        FakeOutcome::ok(r#"{"id":"u1","name":"alice"}"#),
    );

    let client = ApiClient::new(
        transport.clone(),
        store,
        Arc::new(LoggingSignInGate),
        project_settings.api.to_config(),
    );
    client.credentials().save(&CredentialPair {
        access_token: AccessToken("expired".to_string()),
        refresh_token: RefreshToken("R1".to_string()),
    });

    let me: serde_json::Value = client.request(Method::Get, "/users/me", None).await?;
    info!(%me, "request succeeded after transparent refresh");
    info!(pair = ?client.credentials().load(), "rotated credential pair");

    for (i, request) in transport.log().iter().enumerate() {
        info!(
            i,
            method = %request.method,
            url = %request.url,
            authorization = request.header("authorization").unwrap_or("-"),
            "transport saw"
        );
    }

    Ok(())
}
