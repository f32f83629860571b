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

use std::borrow::Cow;
use std::mem;
use std::sync::Arc;

use log::{error, info, warn};

use crate::account::auth::{Authenticator, Credentials};
use crate::account::mailbox_path::{PathResolver, ResolvedPath};
use crate::account::snapshot::FolderSnapshot;
use crate::account::snapshot_cache::{
    CacheBackend, DirectoryCache, LocalCache, SnapshotCache, WriteBack,
};
use crate::account::store::MailboxStore;
use crate::cluster::balancer::{LoadBalancer, Placement, StrategyRegistry};
use crate::cluster::listener::{
    ChangeFeed, ListenerLease, ListenerPool, ListenerRegistration,
};
use crate::cluster::pending::{self, SharedPending};
use crate::cluster::topology::{Node, StaticTopology, Topology};
use crate::imap::proxy::{BackendConnector, BackendProxy};
use crate::support::{
    error::Error,
    log_prefix::LogPrefix,
    system_config::{CacheKind, SystemConfig},
};

pub(super) use crate::imap::syntax as s;

pub(super) static CAPABILITIES: &[&str] =
    &["IMAP4rev1", "ID", "LITERAL+", "NAMESPACE", "UNSELECT"];

pub(super) static TAGLINE: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " ",
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
    ".",
    env!("CARGO_PKG_VERSION_PATCH"),
    " ready"
);

/// Everything a session needs from the process, shared by all sessions.
pub struct Services {
    pub config: Arc<SystemConfig>,
    pub store: Arc<dyn MailboxStore>,
    pub auth: Arc<dyn Authenticator>,
    pub placement: Arc<Placement>,
    pub topology: Arc<StaticTopology>,
    pub listeners: Arc<ListenerPool>,
    pub cache: Arc<SnapshotCache>,
    pub connector: Arc<dyn BackendConnector>,
}

impl Services {
    pub fn new(
        config: Arc<SystemConfig>,
        store: Arc<dyn MailboxStore>,
        auth: Arc<dyn Authenticator>,
        feed: Arc<dyn ChangeFeed>,
        connector: Arc<dyn BackendConnector>,
    ) -> Result<Self, Error> {
        let cluster = &config.cluster;
        let topology = Arc::new(StaticTopology::from_config(&config));
        if !topology.nodes().iter().any(|n| n.id == cluster.local_node) {
            warn!(
                "Local node {:?} is not among the configured nodes; \
                 every folder will be proxied",
                cluster.local_node
            );
        }

        let strategy = StrategyRegistry::default().build(&cluster.strategy);
        let balancer = LoadBalancer::new(strategy);
        info!(
            "Placing accounts with the {:?} strategy",
            balancer.strategy_name()
        );
        let placement = Arc::new(Placement::new(
            balancer,
            Arc::clone(&topology) as Arc<dyn Topology>,
            cluster.local_node.clone(),
        ));

        let cache_backend: Box<dyn CacheBackend> = match config.cache.kind {
            CacheKind::Local => Box::new(LocalCache::new(config.cache.capacity)),
            CacheKind::Directory => {
                Box::new(DirectoryCache::new(config.cache.path.clone())?)
            }
        };

        Ok(Services {
            listeners: Arc::new(ListenerPool::new(feed, Arc::clone(&placement))),
            cache: Arc::new(SnapshotCache::new(cache_backend)),
            config,
            store,
            auth,
            placement,
            topology,
            connector,
        })
    }
}

/// The protocol state of one session.
pub(super) enum SessionState {
    NotAuthenticated,
    Authenticated(Credentials),
    Selected(Credentials, Selected),
    /// After `LOGOUT`.
    Closed,
}

pub(super) enum Selected {
    Local(LocalSelection),
    /// The folder lives on another node; commands go through the session's
    /// proxy.
    Remote(RemoteSelection),
}

/// A folder selected on this node.
pub(super) struct LocalSelection {
    pub(super) path: ResolvedPath,
    pub(super) snapshot: FolderSnapshot,
    pub(super) read_only: bool,
    pub(super) pending: SharedPending,
    // Field order matters: the registration must go before the lease on the
    // listener it registered with.
    pub(super) _registration: ListenerRegistration,
    pub(super) _lease: ListenerLease,
    pub(super) write_back: Option<WriteBack>,
}

pub(super) struct RemoteSelection {
    pub(super) node: Node,
    pub(super) name: String,
}

/// Receives commands as tokenized command text, and emits responses in the
/// model defined in the `syntax` module.
///
/// While primarily a translation layer, it also manages the session state
/// machine, keeps the selected folder's snapshot in sync with the store, and
/// forwards commands for folders owned by other nodes.
pub struct CommandProcessor {
    pub(super) log_prefix: LogPrefix,
    pub(super) services: Arc<Services>,
    pub(super) state: SessionState,
    /// The connection to another node, once one has been needed.
    pub(super) proxy: Option<BackendProxy>,
    /// Set when the peer is another node's proxy; such sessions treat every
    /// folder as local.
    pub(super) proxied_from: Option<String>,
}

/// Used just for the convenient `?` operator. We mostly don't distinguish `Ok`
/// from `Err` --- the contained value is sent down the wire --- though on
/// `Err` no polling happens.
pub(super) type CmdResult = Result<s::Response, s::Response>;

/// Return value from an operation that can either succeed with a value, or
/// fail with an IMAP response.
pub(super) type PartialResult<T> = Result<T, s::Response>;

/// Callback used to send additional non-tagged responses as they become
/// available.
pub type SendResponse<'a> = &'a (dyn Send + Sync + Fn(s::Response));

impl CommandProcessor {
    pub fn new(log_prefix: LogPrefix, services: Arc<Services>) -> Self {
        CommandProcessor {
            log_prefix,
            services,
            state: SessionState::NotAuthenticated,
            proxy: None,
            proxied_from: None,
        }
    }

    pub fn greet(&self) -> s::ResponseLine {
        s::ResponseLine {
            tag: None,
            response: s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Ok,
                code: Some(s::RespTextCode::Capability(CAPABILITIES)),
                quip: Some(Cow::Borrowed(TAGLINE)),
            }),
        }
    }

    pub fn logged_out(&self) -> bool {
        match self.state {
            SessionState::Closed => true,
            _ => false,
        }
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    /// Execute one complete command and return its tagged response.
    pub fn handle_command(
        &mut self,
        command: &s::CommandText,
        sender: SendResponse<'_>,
    ) -> s::ResponseLine {
        let tag = match command.tag() {
            Some(tag) => tag.to_owned(),
            None => {
                return s::ResponseLine {
                    tag: None,
                    response: s::Response::Cond(s::CondResponse {
                        cond: s::RespCondType::Bad,
                        code: Some(s::RespTextCode::Parse),
                        quip: Some(Cow::Borrowed("Missing or invalid tag")),
                    }),
                };
            }
        };

        if let Some(response) = self.try_forward(&tag, command, sender) {
            return s::ResponseLine {
                tag: Some(tag),
                response,
            };
        }

        let cmd = match command.parse() {
            Ok(cmd) => cmd,
            Err(s::ParseError(why)) => {
                return s::ResponseLine {
                    tag: Some(tag),
                    response: s::Response::Cond(s::CondResponse {
                        cond: s::RespCondType::Bad,
                        code: Some(s::RespTextCode::Parse),
                        quip: Some(Cow::Borrowed(why)),
                    }),
                };
            }
        };

        self.apply_pending();

        let (verb, args) = match (cmd.verb.as_str(), cmd.args.split_first()) {
            ("UID", Some((sub, args))) => match sub.as_atom() {
                Some(sub) => (format!("UID {}", sub.to_ascii_uppercase()), args),
                None => ("UID".to_owned(), args),
            },
            (verb, _) => (verb.to_owned(), &cmd.args[..]),
        };

        let res = match verb.as_str() {
            "CAPABILITY" => self.cmd_capability(args, sender),
            "NOOP" => self.cmd_noop(args),
            "LOGOUT" => self.cmd_logout(args, sender),
            "ID" => self.cmd_id(args, sender),
            "LOGIN" => self.cmd_login(args),

            "SELECT" => self.cmd_select(&tag, command, args, sender, false),
            "EXAMINE" => self.cmd_select(&tag, command, args, sender, true),
            "CREATE" => self.cmd_create(args),
            "DELETE" => self.cmd_delete(args),
            "SUBSCRIBE" => self.cmd_subscribe(args, true),
            "UNSUBSCRIBE" => self.cmd_subscribe(args, false),
            "LIST" => self.cmd_list(args, sender, false),
            "LSUB" => self.cmd_list(args, sender, true),
            "STATUS" => self.cmd_status(args, sender),
            "APPEND" => self.cmd_append(args),
            "NAMESPACE" => self.cmd_namespace(args, sender),

            "CHECK" => self.cmd_check(args),
            "CLOSE" => self.cmd_close(args),
            "UNSELECT" => self.cmd_unselect(args),
            "EXPUNGE" => self.cmd_expunge(args, None),
            "SEARCH" => self.cmd_search(args, sender, false),
            "FETCH" => self.cmd_fetch(args, sender, false),
            "STORE" => self.cmd_store(args, sender, false),
            "COPY" => self.cmd_copy(args, false),
            "UID SEARCH" => self.cmd_search(args, sender, true),
            "UID FETCH" => self.cmd_fetch(args, sender, true),
            "UID STORE" => self.cmd_store(args, sender, true),
            "UID COPY" => self.cmd_copy(args, true),
            "UID EXPUNGE" => self.cmd_uid_expunge(args),

            _ => Err(s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Bad,
                code: None,
                quip: Some(Cow::Borrowed("Unknown command")),
            })),
        };

        let response = match res {
            Ok(response) => {
                // Sequence-number FETCH, STORE and SEARCH must not change
                // the numbering the client is looking at.
                let may_renumber = match verb.as_str() {
                    "FETCH" | "STORE" | "SEARCH" => false,
                    _ => true,
                };
                self.poll(may_renumber, sender);
                match response {
                    s::Response::Cond(s::CondResponse {
                        cond,
                        code,
                        quip: None,
                    }) => s::Response::Cond(s::CondResponse {
                        cond,
                        code,
                        quip: Some(Cow::Owned(format!("{} completed", verb))),
                    }),
                    response => response,
                }
            }
            Err(response) => name_failure(&verb, response),
        };

        s::ResponseLine {
            tag: Some(tag),
            response,
        }
    }

    /// The connection is going away without a `LOGOUT`.
    ///
    /// Any snapshot write-back is cancelled rather than committed.
    pub fn abandon(&mut self) {
        if let SessionState::Selected(_, Selected::Local(ref mut sel)) =
            self.state
        {
            sel.write_back = None;
        }
        self.state = SessionState::Closed;
    }

    pub(super) fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(
            &*self.services.store,
            if self.proxied_from.is_some() {
                None
            } else {
                Some(&*self.services.placement)
            },
        )
    }

    /// Leave the Selected state, if in it.
    ///
    /// A local selection's snapshot is written back to the cache.
    pub(super) fn deselect(&mut self) {
        let state = mem::replace(&mut self.state, SessionState::Closed);
        self.state = match state {
            SessionState::Selected(creds, selected) => {
                match selected {
                    Selected::Local(mut sel) => {
                        if let Some(write_back) = sel.write_back.take() {
                            // Expunged entries must not survive into the
                            // cache.
                            sel.snapshot.flush();
                            write_back.commit(&sel.snapshot);
                        }
                    }
                    Selected::Remote(_) => self.log_prefix.set_via(None),
                }
                SessionState::Authenticated(creds)
            }
            state => state,
        };
    }

    /// Fold changes delivered by the listener into the snapshot.
    ///
    /// Nothing is sent to the client here.
    fn apply_pending(&mut self) {
        if let SessionState::Selected(_, Selected::Local(ref mut sel)) =
            self.state
        {
            let changes = pending::drain(&sel.pending);
            if !changes.is_empty() {
                sel.snapshot.apply_changes(changes);
            }
        }
    }

    /// Tell the client about changes to the selected folder.
    ///
    /// If `may_renumber` is false, only flag changes on messages the
    /// client already knows are sent.
    pub(super) fn poll(&mut self, may_renumber: bool, sender: SendResponse<'_>) {
        let sel = match self.state {
            SessionState::Selected(_, Selected::Local(ref mut sel)) => sel,
            _ => return,
        };

        if may_renumber {
            let flush = sel.snapshot.flush();
            for &seqnum in &flush.expunged {
                sender(s::Response::Expunge(seqnum));
            }
            if flush.exists_changed {
                sender(s::Response::Exists(sel.snapshot.num_messages() as u32));
            }
            if !flush.new.is_empty() {
                sender(s::Response::Recent(sel.snapshot.recent_count() as u32));
            }
        }

        for uid in sel.snapshot.take_changed_flags() {
            if let Some(entry) = sel.snapshot.by_uid(uid) {
                if !entry.is_expunged() {
                    sender(s::Response::Fetch {
                        seqnum: entry.seqnum(),
                        atts: vec![
                            s::FetchAtt::Uid(uid),
                            s::FetchAtt::Flags {
                                flags: entry.flags().cloned().collect(),
                                recent: entry.is_recent(),
                            },
                        ],
                    });
                }
            }
        }
    }
}

pub(super) fn success() -> CmdResult {
    Ok(s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::Ok,
        code: None,
        quip: None,
    }))
}

pub(super) fn parse_error(quip: &'static str) -> s::Response {
    s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::Bad,
        code: Some(s::RespTextCode::Parse),
        quip: Some(Cow::Borrowed(quip)),
    })
}

/// Require exactly `n` arguments.
pub(super) fn arity(args: &[s::Token], n: usize) -> PartialResult<()> {
    if n == args.len() {
        Ok(())
    } else {
        Err(parse_error("Wrong number of arguments"))
    }
}

pub(super) fn astring_arg(
    args: &[s::Token],
    ix: usize,
) -> PartialResult<Cow<'_, str>> {
    args.get(ix)
        .and_then(s::Token::as_astring)
        .ok_or_else(|| parse_error("Expected a string argument"))
}

pub(super) fn atom_arg(args: &[s::Token], ix: usize) -> PartialResult<&str> {
    args.get(ix)
        .and_then(s::Token::as_atom)
        .ok_or_else(|| parse_error("Expected an atom argument"))
}

/// Prefix the text of a failure with the command that failed.
pub(super) fn name_failure(verb: &str, response: s::Response) -> s::Response {
    match response {
        s::Response::Cond(s::CondResponse {
            cond,
            code,
            quip: Some(quip),
        }) if s::RespCondType::Ok != cond => {
            s::Response::Cond(s::CondResponse {
                cond,
                code,
                quip: Some(Cow::Owned(format!("{} failed: {}", verb, quip))),
            })
        }
        response => response,
    }
}

pub(super) fn catch_all_error_handling(
    log_prefix: &LogPrefix,
    e: Error,
) -> s::Response {
    if e.is_backend() {
        warn!("{} {}", log_prefix, e);
        return s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::No,
            code: Some(s::RespTextCode::Unavailable),
            quip: Some(Cow::Owned(e.to_string())),
        });
    }

    match e {
        Error::NoNodesAvailable => s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::No,
            code: Some(s::RespTextCode::Unavailable),
            quip: Some(Cow::Owned(e.to_string())),
        }),
        Error::InvalidMailboxName | Error::UnsafeName => {
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::No,
                code: Some(s::RespTextCode::Cannot),
                quip: Some(Cow::Owned(e.to_string())),
            })
        }
        Error::NxMailbox => s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::No,
            code: Some(s::RespTextCode::Nonexistent),
            quip: Some(Cow::Owned(e.to_string())),
        }),
        Error::PermissionDenied => s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::No,
            code: Some(s::RespTextCode::NoPerm),
            quip: Some(Cow::Owned(e.to_string())),
        }),
        e => {
            error!("{} Unhandled internal error: {}", log_prefix, e);
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::No,
                code: Some(s::RespTextCode::ServerBug),
                quip: Some(Cow::Borrowed(
                    "Unexpected error; check server logs for details",
                )),
            })
        }
    }
}
