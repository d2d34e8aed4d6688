extern crate clap;
use crate::error::{Error, Result};
use crate::persistence::OLDMAILS;
use crate::tcpstream::{TlsMode, TrustStore};
use crate::AppConfig;
use clap::{App, Arg, ArgMatches};
use std::path::PathBuf;

fn app() -> App<'static, 'static> {
    App::new("popfetch")
        .version("0.1.0")
        .about("Downloads new mail from a POP3 mailbox, each message exactly once")
        .arg(Arg::with_name("server")
            .value_name("SERVER")
            .help("Host name or address of the POP3 server")
            .required(true)
            .index(1))
        .arg(Arg::with_name("port")
            .short("p")
            .long("port")
            .value_name("PORT")
            .help("Server port [default: 995 with -T, 110 otherwise]")
            .takes_value(true))
        .arg(Arg::with_name("tls")
            .short("T")
            .long("tls")
            .help("Use TLS from the start of the connection")
            .conflicts_with("starttls"))
        .arg(Arg::with_name("starttls")
            .short("S")
            .long("starttls")
            .help("Upgrade a plain connection to TLS with STLS"))
        .arg(Arg::with_name("certfile")
            .short("c")
            .long("certfile")
            .value_name("FILE")
            .help("File of trusted certificates to validate the server against")
            .takes_value(true))
        .arg(Arg::with_name("certaddr")
            .short("C")
            .long("certaddr")
            .value_name("DIR")
            .help("Directory of trusted certificates to validate the server against")
            .takes_value(true))
        .arg(Arg::with_name("delete")
            .short("d")
            .long("delete")
            .help("Delete messages from the server after processing them"))
        .arg(Arg::with_name("new")
            .short("n")
            .long("new")
            .help("Report only newly downloaded messages"))
        .arg(Arg::with_name("authfile")
            .short("a")
            .long("auth-file")
            .value_name("FILE")
            .help("File with 'username = ...' and 'password = ...' lines")
            .required(true)
            .takes_value(true))
        .arg(Arg::with_name("outdir")
            .short("o")
            .long("out-dir")
            .value_name("DIR")
            .help("Directory new messages are written to")
            .required(true)
            .takes_value(true))
        .arg(Arg::with_name("statefile")
            .long("state-file")
            .value_name("FILE")
            .help("List of already downloaded message ids [default: .oldmails]")
            .takes_value(true))
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .multiple(true)
            .help("Log more; twice to trace protocol traffic"))
}

pub fn arg_parse() -> Result<AppConfig> {
    from_matches(&app().get_matches())
}

fn from_matches(matches: &ArgMatches<'_>) -> Result<AppConfig> {
    let tls_mode = if matches.is_present("tls") {
        TlsMode::Implicit
    } else if matches.is_present("starttls") {
        TlsMode::StartTls
    } else {
        TlsMode::Plain
    };

    let port = match matches.value_of("port") {
        Some(port) => match port.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => return Err(Error::Config(format!("invalid port: {}", port))),
        },
        None => tls_mode.default_port(),
    };

    // Required arguments are enforced by clap before we get here.
    let required = |name: &str| {
        matches.value_of(name).map(str::to_owned).ok_or_else(|| {
            Error::Config(format!("missing argument: {}", name))
        })
    };

    Ok(AppConfig {
        server: required("server")?,
        port,
        tls_mode,
        trust: TrustStore {
            cert_file: matches.value_of("certfile").map(PathBuf::from),
            cert_dir: matches.value_of("certaddr").map(PathBuf::from),
        },
        delete: matches.is_present("delete"),
        only_new: matches.is_present("new"),
        auth_file: PathBuf::from(required("authfile")?),
        out_dir: PathBuf::from(required("outdir")?),
        state_file: PathBuf::from(
            matches.value_of("statefile").unwrap_or(OLDMAILS),
        ),
        verbosity: matches.occurrences_of("verbose"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<AppConfig> {
        let matches = app()
            .get_matches_from_safe(
                std::iter::once("popfetch").chain(args.iter().cloned()),
            )
            .map_err(|e| Error::Config(e.message))?;
        from_matches(&matches)
    }

    #[test]
    fn arg_parse_minimal_uses_plain_defaults() {
        let config =
            parse(&["pop.example.com", "-a", "auth", "-o", "out"]).unwrap();
        assert_eq!("pop.example.com", config.server);
        assert_eq!(110, config.port);
        assert_eq!(TlsMode::Plain, config.tls_mode);
        assert_eq!(TrustStore::default(), config.trust);
        assert!(!config.delete);
        assert!(!config.only_new);
        assert_eq!(PathBuf::from("auth"), config.auth_file);
        assert_eq!(PathBuf::from("out"), config.out_dir);
        assert_eq!(PathBuf::from(OLDMAILS), config.state_file);
        assert_eq!(0, config.verbosity);
    }

    #[test]
    fn arg_parse_tls_defaults_to_pop3s_port() {
        let config = parse(&[
            "pop.example.com",
            "-T",
            "-c",
            "ca.pem",
            "-C",
            "/etc/ssl/certs",
            "-d",
            "-n",
            "-vv",
            "-a",
            "auth",
            "-o",
            "out",
        ])
        .unwrap();
        assert_eq!(995, config.port);
        assert_eq!(TlsMode::Implicit, config.tls_mode);
        assert_eq!(Some(PathBuf::from("ca.pem")), config.trust.cert_file);
        assert_eq!(
            Some(PathBuf::from("/etc/ssl/certs")),
            config.trust.cert_dir
        );
        assert!(config.delete);
        assert!(config.only_new);
        assert_eq!(2, config.verbosity);
    }

    #[test]
    fn arg_parse_explicit_port_overrides_default() {
        let config = parse(&[
            "pop.example.com",
            "-S",
            "-p",
            "1110",
            "-a",
            "auth",
            "-o",
            "out",
            "--state-file",
            "/var/lib/popfetch/seen",
        ])
        .unwrap();
        assert_eq!(1110, config.port);
        assert_eq!(TlsMode::StartTls, config.tls_mode);
        assert_eq!(
            PathBuf::from("/var/lib/popfetch/seen"),
            config.state_file
        );
    }

    #[test]
    fn arg_parse_bad_port_is_config_error() {
        for port in &["0", "pop3", "70000"] {
            assert_matches!(
                Err(Error::Config(_)),
                parse(&["host", "-p", *port, "-a", "auth", "-o", "out"])
            );
        }
    }

    #[test]
    fn arg_parse_tls_and_starttls_conflict() {
        assert!(parse(&["host", "-T", "-S", "-a", "a", "-o", "o"]).is_err());
    }

    #[test]
    fn arg_parse_missing_required_fails() {
        assert!(parse(&["host", "-o", "out"]).is_err());
        assert!(parse(&["host", "-a", "auth"]).is_err());
        assert!(parse(&["-a", "auth", "-o", "out"]).is_err());
    }
}
