//! Socket registry
//!
//! Holds every live socket, indexed by id and by tag under a single lock so
//! each lookup sees one consistent snapshot.

use super::sentence::{Selector, Sentence};
use crate::action::{action, Dispatcher, DispatcherOptions};
use crate::error::{Error, Result};
use crate::socket::{Socket, SocketState};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Id and tag indices
#[derive(Default)]
struct Index {
    /// Socket ID -> Socket
    sockets: HashMap<String, Arc<Socket>>,

    /// Tag -> Socket IDs
    tags: HashMap<String, HashSet<String>>,
}

impl Index {
    fn contains(&self, socket: &Socket) -> bool {
        self.sockets
            .get(socket.id())
            .is_some_and(|registered| std::ptr::eq(registered.as_ref(), socket))
    }

    fn insert(&mut self, socket: Arc<Socket>, tags: &BTreeSet<String>) {
        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(socket.id().to_string());
        }
        self.sockets.insert(socket.id().to_string(), socket);
    }

    fn remove(&mut self, socket: &Socket, tags: &BTreeSet<String>) -> bool {
        if !self.contains(socket) {
            return false;
        }

        self.sockets.remove(socket.id());
        for tag in tags {
            self.unlink(tag, socket.id());
        }
        true
    }

    fn reindex(&mut self, id: &str, before: &BTreeSet<String>, after: &BTreeSet<String>) {
        for removed in before.difference(after) {
            self.unlink(removed, id);
        }
        for added in after.difference(before) {
            self.tags
                .entry(added.clone())
                .or_default()
                .insert(id.to_string());
        }
    }

    fn unlink(&mut self, tag: &str, id: &str) {
        if let Some(ids) = self.tags.get_mut(tag) {
            ids.remove(id);
            if ids.is_empty() {
                self.tags.remove(tag);
            }
        }
    }

    /// Sockets carrying every tag in `names`; all sockets when empty
    fn by_tags(&self, names: &[String]) -> Vec<Arc<Socket>> {
        let Some((first, rest)) = names.split_first() else {
            return self.sockets.values().cloned().collect();
        };

        let Some(candidates) = self.tags.get(first) else {
            return Vec::new();
        };

        candidates
            .iter()
            .filter(|id| {
                rest.iter()
                    .all(|tag| self.tags.get(tag).is_some_and(|ids| ids.contains(*id)))
            })
            .filter_map(|id| self.sockets.get(id).cloned())
            .collect()
    }
}

/// State shared between a server handle and the sockets registered with it
pub(crate) struct ServerShared {
    index: RwLock<Index>,
    open_actions: Dispatcher<Arc<Socket>>,
    shutting_down: AtomicBool,
}

impl ServerShared {
    /// Apply a tag mutation and mirror it in the tag index
    pub(crate) fn retag<F>(&self, socket: &Socket, apply: F)
    where
        F: FnOnce(&mut BTreeSet<String>),
    {
        let mut index = self.index.write();
        let mut tags = socket.tags.write();
        let before = tags.clone();
        apply(&mut tags);

        if index.contains(socket) {
            index.reindex(socket.id(), &before, &tags);
        }
    }

    /// Remove a terminated socket and complete its `Closing → Closed` step
    ///
    /// Returns `false` if the socket was already closed.
    pub(crate) fn detach(&self, socket: &Socket) -> bool {
        let mut index = self.index.write();
        let tags = socket.tags.read().clone();
        if index.remove(socket, &tags) {
            tracing::debug!(socket_id = %socket.id(), remaining = index.sockets.len(), "Socket removed from server");
        }

        *socket.binding.write() = None;
        socket.mark_closed()
    }
}

/// Registry of live sockets
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    /// Create an empty server
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ServerShared {
                index: RwLock::new(Index::default()),
                open_actions: Dispatcher::new("server/open", DispatcherOptions::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Register an open socket and fire the open hooks
    ///
    /// The hooks run on the calling thread after the index lock is released,
    /// in registration order, and have all returned when `open` does. Opens
    /// made one after another on one thread reach the hooks in that order;
    /// opens racing on different threads may interleave their hook calls.
    pub fn open(&self, socket: Arc<Socket>) -> Result<()> {
        {
            let mut index = self.shared.index.write();
            if self.shared.shutting_down.load(Ordering::SeqCst) {
                return Err(Error::ConnectionClosed);
            }

            if index.sockets.contains_key(socket.id()) {
                return Err(Error::handshake(format!(
                    "socket id '{}' is already in use",
                    socket.id()
                )));
            }

            let mut binding = socket.binding.write();
            if binding.is_some() {
                return Err(Error::handshake("socket is already registered"));
            }
            if socket.state() != SocketState::Open {
                return Err(Error::ConnectionClosed);
            }

            *binding = Some(Arc::downgrade(&self.shared));
            let tags = socket.tags.read().clone();
            index.insert(socket.clone(), &tags);
        }

        tracing::info!(
            socket_id = %socket.id(),
            uri = %socket.uri(),
            tags = ?socket.tags(),
            "Socket opened"
        );

        self.shared.open_actions.fire(socket);
        Ok(())
    }

    /// Called with every socket opened from now on
    ///
    /// See [`Server::open`] for the order hooks run in.
    pub fn on_socket<F>(&self, f: F) -> &Self
    where
        F: Fn(&Arc<Socket>) + Send + Sync + 'static,
    {
        self.shared.open_actions.add(action(f));
        self
    }

    /// Every registered socket
    pub fn all(&self) -> Sentence {
        Sentence::new(self.clone(), Selector::All)
    }

    /// The socket with `id`, if any
    pub fn by_id(&self, id: impl Into<String>) -> Sentence {
        Sentence::new(self.clone(), Selector::ById(id.into()))
    }

    /// Sockets carrying every tag in `names`
    pub fn by_tag<I, S>(&self, names: I) -> Sentence
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Sentence::new(
            self.clone(),
            Selector::ByTag(names.into_iter().map(Into::into).collect()),
        )
    }

    /// Run `f` for every registered socket
    pub fn all_with<F>(&self, f: F) -> &Self
    where
        F: FnMut(&Arc<Socket>),
    {
        self.all().for_each(f);
        self
    }

    /// Run `f` for the socket with `id`, if registered
    pub fn by_id_with<F>(&self, id: impl Into<String>, f: F) -> &Self
    where
        F: FnMut(&Arc<Socket>),
    {
        self.by_id(id).for_each(f);
        self
    }

    /// Run `f` for every socket carrying all of `names`
    pub fn by_tag_with<I, S, F>(&self, names: I, f: F) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(&Arc<Socket>),
    {
        self.by_tag(names).for_each(f);
        self
    }

    /// Snapshot of the sockets matching `selector`
    pub fn resolve(&self, selector: &Selector) -> Vec<Arc<Socket>> {
        let index = self.shared.index.read();
        match selector {
            Selector::All => index.sockets.values().cloned().collect(),
            Selector::ById(id) => index.sockets.get(id).cloned().into_iter().collect(),
            Selector::ByTag(names) => index.by_tags(names),
        }
    }

    /// Get a socket by ID
    pub fn get(&self, id: &str) -> Option<Arc<Socket>> {
        self.shared.index.read().sockets.get(id).cloned()
    }

    /// Get number of registered sockets
    pub fn len(&self) -> usize {
        self.shared.index.read().sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs of every registered socket
    pub fn ids(&self) -> Vec<String> {
        self.shared.index.read().sockets.keys().cloned().collect()
    }

    /// Number of sockets carrying `tag`
    pub fn tag_count(&self, tag: &str) -> usize {
        self.shared
            .index
            .read()
            .tags
            .get(tag)
            .map_or(0, HashSet::len)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Close every socket and refuse new ones
    ///
    /// Sockets are terminated without waiting for their transports, so every
    /// pending reply is rejected before this returns.
    pub fn shutdown(&self) -> usize {
        self.shared.shutting_down.store(true, Ordering::SeqCst);

        let sockets = self.resolve(&Selector::All);
        for socket in &sockets {
            socket.close();
            socket.handle_closed();
        }

        tracing::info!(closed = sockets.len(), "Server shut down");
        sockets.len()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.shared.index.read();
        f.debug_struct("Server")
            .field("sockets", &index.sockets.len())
            .field("tags", &index.tags.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
