//-
// Copyright (c) 2026, Mailfront Developers
//
// This file is part of Mailfront.
//
// Mailfront is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailfront is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailfront. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::account::auth;
use crate::cluster::balancer::{LoadBalancer, StrategyRegistry};
use crate::cluster::topology::{StaticTopology, Topology};
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Accept IMAP connections on the configured address.
    ///
    /// Folders owned by this node are served directly; everything else is
    /// forwarded to the node that owns it.
    Serve(CommonOptions),
    /// Prompt for a password and print its hash.
    ///
    /// The output is suitable for the `password_hash` field of a
    /// `[[users]]` entry in `mailfront.toml`.
    HashPassword,
    /// Print the node that owns an account under the current configuration.
    Assign(AssignSubcommand),
}

#[derive(StructOpt, Default)]
struct CommonOptions {
    /// The directory containing `mailfront.toml` etc
    /// [default: /etc/mailfront or /usr/local/etc/mailfront]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,
}

#[derive(StructOpt)]
struct AssignSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,

    /// The account whose placement to show.
    account: String,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    match cmd {
        Command::Serve(common) => {
            let (root, system_config) = load_config(common);
            init_logging(&root);
            super::serve::serve(system_config);
        }
        Command::HashPassword => hash_password(),
        Command::Assign(cmd) => {
            let (_, system_config) = load_config(cmd.common);
            assign(&system_config, &cmd.account);
        }
    }
}

fn load_config(common: CommonOptions) -> (PathBuf, SystemConfig) {
    let root = common.root.unwrap_or_else(|| {
        if Path::new("/etc/mailfront/mailfront.toml").is_file() {
            "/etc/mailfront".to_owned().into()
        } else if Path::new("/usr/local/etc/mailfront/mailfront.toml").is_file()
        {
            "/usr/local/etc/mailfront".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/mailfront nor /usr/local/etc/mailfront looks\n\
                 like the Mailfront root; use --root=/path/to/mailfront if\n\
                 your installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let system_config_path = root.join("mailfront.toml");
    let mut system_config_toml = Vec::new();
    if let Err(e) = fs::File::open(&system_config_path)
        .and_then(|mut f| f.read_to_end(&mut system_config_toml))
    {
        eprintln!("Error reading '{}': {}", system_config_path.display(), e);
        EX_CONFIG.exit();
    }

    let system_config: SystemConfig =
        match toml::from_slice(&system_config_toml) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Error in config file at '{}': {}",
                    system_config_path.display(),
                    e
                );
                EX_CONFIG.exit()
            }
        };

    (root, system_config)
}

fn init_logging(root: &Path) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    // log4rs if configured, syslog otherwise. Nothing useful can be done if
    // either fails, so bail out.
    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
            EX_CONFIG.exit();
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let logger = match syslog::unix(formatter) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("Failed to connect to syslog: {}", e);
                EX_OSERR.exit()
            }
        };

        if let Err(e) =
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|_| log::set_max_level(log::LevelFilter::Info))
        {
            eprintln!("Failed to initialise logging: {}", e);
            EX_SOFTWARE.exit();
        }
    }
}

fn hash_password() {
    let password = match rpassword::read_password_from_tty(Some("Password: "))
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to read password: {}", e);
            EX_IOERR.exit()
        }
    };

    let confirm = match rpassword::read_password_from_tty(Some("Confirm: ")) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to read password: {}", e);
            EX_IOERR.exit()
        }
    };

    if password != confirm {
        eprintln!("Passwords don't match");
        EX_USAGE.exit();
    }

    match auth::hash_password(password.as_bytes()) {
        Ok(hash) => println!("{}", hash),
        Err(e) => {
            eprintln!("Failed to hash password: {}", e);
            EX_SOFTWARE.exit()
        }
    }
}

fn assign(system_config: &SystemConfig, account: &str) {
    let topology = StaticTopology::from_config(system_config);
    let balancer = LoadBalancer::new(
        StrategyRegistry::default().build(&system_config.cluster.strategy),
    );

    match balancer.assign(account, &topology.nodes()) {
        Ok(node) => println!("{} {}", node, node.address),
        Err(e) => {
            eprintln!("{}", e);
            EX_UNAVAILABLE.exit()
        }
    }
}
