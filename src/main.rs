use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use arkive_client::api::auth::RegisterRequest;
use arkive_client::config::Config;
use arkive_client::session::teardown::SessionEvent;
use arkive_client::session::AuthSession;
use arkive_client::transport::ApiRequest;
use arkive_client::utils::logging;

#[derive(Parser)]
#[command(name = "arkive", version, about = "Arkive API client")]
struct AppCli {
    /// Config file path (environment variables when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with username and password
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in with a Google ID token
    LoginGoogle { id_token: String },
    /// Create an account
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Confirm the emailed verification code
    VerifyEmail { code: String },
    /// Send the verification code again
    ResendVerification { email: String },
    /// Sign out and forget the stored credential
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Authenticated GET against an API path
    Get { path: String },
}

async fn run(session: &AuthSession, command: Commands) -> Result<()> {
    match command {
        Commands::Login { username, password } => {
            session.login(&username, &password).await?;
            let user = session.fetch_user_info().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::LoginGoogle { id_token } => {
            session.login_with_google(&id_token).await?;
            let user = session.fetch_user_info().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Register {
            full_name,
            username,
            email,
            password,
        } => {
            let request = RegisterRequest {
                full_name,
                username,
                email,
                password,
            };
            let user = session.register(&request).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::VerifyEmail { code } => {
            session.verify_email(&code).await?;
            println!("{}", json!({ "verified": true }));
        }
        Commands::ResendVerification { email } => {
            let message = session.resend_verification_code(&email).await?;
            println!("{}", json!({ "sent": true, "message": message }));
        }
        Commands::Logout => {
            session.logout().await?;
        }
        Commands::Whoami => {
            let user = match session.current_user().await {
                Some(user) => user,
                None => session.fetch_user_info().await?,
            };
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Get { path } => {
            let resp = session.gateway().send(ApiRequest::get(path)).await?;
            println!("{}", serde_json::to_string_pretty(&resp.body)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args = AppCli::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    info!(api_url = %config.api_url, version = arkive_client::VERSION, "arkive client starting");

    let session = AuthSession::from_config(&config).await?;
    let mut events = session.events().subscribe();

    let outcome = run(&session, args.command).await;

    if let Ok(SessionEvent::Expired { redirect_to, reason }) = events.try_recv() {
        warn!(code = %reason.code, "session expired");
        eprintln!(
            "session expired ({}); sign in again ({})",
            reason.message, redirect_to
        );
    }

    outcome
}
