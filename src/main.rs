#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

mod argp;
mod codec;
mod credentials;
mod error;
mod logging;
mod message;
mod output;
mod persistence;
mod pop3;
mod shutdown;
mod tcpstream;

use std::path::PathBuf;

use log::{error, info, warn};

use error::{Error, Result, EX_OK};
use output::OutputDir;
use persistence::OldMails;
use pop3::{POP3Client, Summary};
use shutdown::ShutdownSignal;
use tcpstream::{TlsMode, TrustStore};

#[derive(Debug)]
pub struct AppConfig {
    pub server: String,
    pub port: u16,
    pub tls_mode: TlsMode,
    pub trust: TrustStore,
    pub delete: bool,
    pub only_new: bool,
    pub auth_file: PathBuf,
    pub out_dir: PathBuf,
    pub state_file: PathBuf,
    pub verbosity: u64,
}

fn main() {
    let app_config = match argp::arg_parse() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code().exit()
        }
    };
    if let Err(e) = logging::init(app_config.verbosity) {
        eprintln!("{}", e);
        e.exit_code().exit()
    }

    let only_new = app_config.only_new;
    match run(app_config) {
        Ok(summary) => {
            println!("{}", report(&summary, only_new));
            EX_OK.exit()
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code().exit()
        }
    }
}

fn run(config: AppConfig) -> Result<Summary> {
    if TlsMode::Plain == config.tls_mode
        && TrustStore::default() != config.trust
    {
        warn!("Certificate options are ignored without -T or -S");
    }

    // Everything that can be wrong locally is checked before connecting.
    let credentials = credentials::parse_auth_file(&config.auth_file)?;
    let mut out_dir = OutputDir::open(&config.out_dir)?;
    let old_mails = OldMails::load(&config.state_file).map_err(|e| {
        Error::Config(format!(
            "cannot load {}: {}",
            config.state_file.display(),
            e
        ))
    })?;

    if let Err(e) = shutdown::install_handlers() {
        warn!("Could not install signal handlers: {}", e);
    }

    let mut client =
        POP3Client::new(old_mails, config.delete, ShutdownSignal::process());
    client.connect(|| {
        let connection = tcpstream::connect(
            &config.server,
            config.port,
            config.tls_mode,
            &config.trust,
        )?;
        info!(
            "Connected to {} ({}): {}",
            config.server,
            if connection.tls { "TLS" } else { "plain text" },
            connection.greeting
        );
        Ok(connection.stream)
    })?;

    info!("Writing new messages to {}", out_dir.path().display());
    let summary = client.fetch_emails(&credentials, &mut out_dir)?;
    info!(
        "{} of {} messages were new, {} already downloaded, {} deleted; \
         {} message ids known",
        summary.new,
        summary.total,
        summary.old,
        summary.deleted,
        client.old_mails().len()
    );
    Ok(summary)
}

fn report(summary: &Summary, only_new: bool) -> String {
    let what = if only_new { "new message" } else { "message" };
    let plural = if 1 == summary.new { "" } else { "s" };
    if summary.interrupted {
        format!(
            "Interrupted; downloaded {} {}{}.",
            summary.new, what, plural
        )
    } else {
        format!("Downloaded {} {}{}.", summary.new, what, plural)
    }
}
