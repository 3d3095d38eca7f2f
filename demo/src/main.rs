//! Sigil token walkthrough
//!
//! Issues and verifies link tokens and bearer tokens from the command line.
//! Logs go to stderr (`RUST_LOG`, default `info`); results are printed to
//! stdout as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use sigil_tokens::jwt::JwkSet;
use sigil_tokens::jwt::manager::generate_key;
use sigil_tokens::{
    CachedJwksValidator, Claims, DownloadToken, JwksCache, JwksValidator, LinkToken,
    OrgInviteToken, ResetToken, TokenConfig, TokenManager, Validator, VerificationToken,
    encode_secret,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ulid::Ulid;

/// Sigil token walkthrough
#[derive(Parser, Debug)]
#[command(name = "sigil-demo", version, about = "Issue and verify Sigil tokens")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an Ed25519 signing key
    Keygen {
        /// Key id
        #[arg(long, default_value = "sigil-key")]
        kid: String,
    },

    /// Sign a link token and verify the resulting pair
    #[command(subcommand)]
    Link(LinkCommands),

    /// Issue an access/refresh token pair
    Issue(IssueArgs),

    /// Verify or parse a bearer token
    Verify(VerifyArgs),
}

#[derive(Subcommand, Debug)]
enum LinkCommands {
    /// Email verification link
    Verification {
        /// Address to verify
        email: String,
    },

    /// Password reset link
    Reset {
        /// User id; a new one is generated when omitted
        #[arg(long)]
        user_id: Option<Ulid>,
    },

    /// Organization invitation link
    Invite {
        /// Invited address
        email: String,
        /// Inviting organization
        #[arg(long)]
        org_id: Ulid,
    },

    /// File download link
    Download {
        /// Object to download
        object_uri: String,
        /// File name to serve the object as
        #[arg(long)]
        file_name: Option<String>,
        /// Validity in seconds
        #[arg(long)]
        expires_in: Option<i64>,
    },
}

#[derive(Args, Debug)]
struct IssueArgs {
    /// JSON token configuration; a key is generated when it has none
    #[arg(long)]
    config: Option<PathBuf>,

    /// Audience, when no configuration file is given
    #[arg(long, default_value = "https://api.sigil.dev")]
    audience: String,

    /// Issuer, when no configuration file is given
    #[arg(long, default_value = "https://auth.sigil.dev")]
    issuer: String,

    /// User id for the subject; generated when omitted
    #[arg(long)]
    user_id: Option<Ulid>,

    /// Organization id; generated when omitted
    #[arg(long)]
    org_id: Option<Ulid>,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// The bearer token
    token: String,

    /// Local JWK set file
    #[arg(long, conflicts_with = "jwks_url", required_unless_present = "jwks_url")]
    jwks_file: Option<PathBuf>,

    /// Remote JWKS endpoint
    #[arg(long)]
    jwks_url: Option<String>,

    /// Expected audience
    #[arg(long, default_value = "https://api.sigil.dev")]
    audience: String,

    /// Expected issuer
    #[arg(long, default_value = "https://auth.sigil.dev")]
    issuer: String,

    /// Clock skew tolerance in seconds
    #[arg(long, default_value_t = 0)]
    leeway: u64,

    /// Check the signature only
    #[arg(long)]
    parse_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output = match cli.command {
        Commands::Keygen { kid } => keygen(&kid)?,
        Commands::Link(command) => link(command)?,
        Commands::Issue(args) => issue(args).await?,
        Commands::Verify(args) => verify(args).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn keygen(kid: &str) -> Result<serde_json::Value> {
    let der = generate_key()?;
    let config = TokenConfig {
        kid: kid.to_string(),
        keys: [(kid.to_string(), STANDARD.encode(&der))].into(),
        ..TokenConfig::new("https://api.sigil.dev", "https://auth.sigil.dev")
    };
    let manager = TokenManager::new(config.clone())?;
    info!(kid, "Generated signing key");

    Ok(json!({ "config": config, "jwks": manager.keys() }))
}

fn link(command: LinkCommands) -> Result<serde_json::Value> {
    match command {
        LinkCommands::Verification { email } => sign_and_check(&VerificationToken::new(email)?),
        LinkCommands::Reset { user_id } => {
            sign_and_check(&ResetToken::new(user_id.unwrap_or_else(Ulid::new))?)
        }
        LinkCommands::Invite { email, org_id } => {
            sign_and_check(&OrgInviteToken::new(email, org_id)?)
        }
        LinkCommands::Download {
            object_uri,
            file_name,
            expires_in,
        } => {
            let mut token = DownloadToken::new(object_uri)?;
            if let Some(file_name) = file_name {
                token = token.with_file_name(file_name);
            }
            if let Some(secs) = expires_in {
                token = token.with_expires_in(download_ttl(secs)?)?;
            }
            sign_and_check(&token)
        }
    }
}

fn download_ttl(secs: i64) -> Result<chrono::Duration> {
    chrono::Duration::try_seconds(secs)
        .with_context(|| format!("--expires-in {secs} is out of range"))
}

fn sign_and_check<T>(token: &T) -> Result<serde_json::Value>
where
    T: LinkToken + serde::Serialize,
{
    let (signature, secret) = token.sign()?;
    token.verify(&signature, &secret)?;
    info!(kind = ?T::KIND, "Link token signed and verified");

    Ok(json!({
        "token": token,
        "signature": signature,
        "secret": encode_secret(&secret),
    }))
}

async fn issue(args: IssueArgs) -> Result<serde_json::Value> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<TokenConfig>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => TokenConfig::new(args.audience, args.issuer),
    };
    if config.keys.is_empty() {
        config.generate_keys = true;
    }

    let manager = TokenManager::new(config)?;
    let claims = Claims::for_user(
        args.user_id.unwrap_or_else(Ulid::new),
        args.org_id.unwrap_or_else(Ulid::new),
    );
    let pair = manager.create_token_pair(&claims).await?;
    info!(kid = %manager.config().kid, "Issued token pair");

    Ok(json!({
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
        "jwks": manager.keys(),
    }))
}

async fn verify(args: VerifyArgs) -> Result<serde_json::Value> {
    let leeway = Duration::from_secs(args.leeway);
    let validator: Box<dyn Validator> = match (&args.jwks_file, &args.jwks_url) {
        (Some(path), _) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let keys: JwkSet = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            Box::new(
                JwksValidator::from_key_set(keys, &args.audience, &args.issuer).with_leeway(leeway),
            )
        }
        (None, Some(url)) => {
            let config = TokenConfig {
                jwks_endpoint: Some(url.clone()),
                leeway,
                ..TokenConfig::new(&args.audience, &args.issuer)
            };
            let cache = Arc::new(JwksCache::with_ttl(config.jwks_refresh_interval));
            Box::new(CachedJwksValidator::from_config(cache, &config)?)
        }
        (None, None) => bail!("either --jwks-file or --jwks-url is required"),
    };

    let result = if args.parse_only {
        validator.parse(&args.token).await
    } else {
        validator.verify(&args.token).await
    };

    match result {
        Ok(claims) => Ok(json!({ "valid": true, "claims": claims })),
        Err(e) => Ok(json!({
            "valid": false,
            "error": e.to_string(),
            "failures": e.kinds().map(|kind| kind.to_string()).collect::<Vec<_>>(),
        })),
    }
}
