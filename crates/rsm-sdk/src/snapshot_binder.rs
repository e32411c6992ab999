//! Binding of document and query sources.
//!
//! Documents are mirrored into object slots, one SET_OBJECT per delivery.
//! Queries are mirrored into array slots by routing each entry of the
//! delivered diff, in order, through [`RemoteChange`].

use crate::config::{BindOptions, ErrorCallback, MirrorConfig, ReadyCallback, ReadyValue};
use crate::dispatcher::Dispatcher;
use crate::error::{BindError, RemoteError, Result};
use crate::mirror::SlotMirror;
use crate::registry::{Binding, BindingRegistry};
use crate::source::{
    DocumentRef, ListenOptions, MetadataChanges, QueryRef, SnapshotSource, SourceShape,
    Unsubscribe,
};
use futures::channel::oneshot;
use parking_lot::Mutex;
use rsm_core::{record_from_document, CallOnce, QuerySnapshot, RemoteChange};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tracing::{debug, warn};

type ReadySender = oneshot::Sender<Result<ReadyValue>>;

/// Resolves once with the first consistent value of a binding.
///
/// Resolves to [`BindError::Unbound`] if the binding is torn down first.
#[must_use = "dropping Ready does not cancel the binding"]
pub struct Ready {
    key: String,
    rx: oneshot::Receiver<Result<ReadyValue>>,
}

impl Ready {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Future for Ready {
    type Output = Result<ReadyValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => {
                Poll::Ready(Err(BindError::Unbound(self.key.clone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for Ready {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ready").field("key", &self.key).finish()
    }
}

/// Sending side of [`Ready`], plus the user callbacks.
struct ReadySignal {
    key: String,
    sender: Arc<Mutex<Option<ReadySender>>>,
    once: CallOnce<std::result::Result<ReadyValue, RemoteError>>,
    on_error: Option<ErrorCallback>,
}

impl ReadySignal {
    fn new(key: &str, options: &BindOptions) -> (Arc<Self>, Ready) {
        let (tx, rx) = oneshot::channel();
        let sender = Arc::new(Mutex::new(Some(tx)));
        let on_ready: Option<ReadyCallback> = options.on_ready.clone();
        let on_error = options.on_error.clone();

        let once = {
            let sender = sender.clone();
            let on_error = on_error.clone();
            CallOnce::new(move |result: std::result::Result<ReadyValue, RemoteError>| {
                // Settle before user callbacks run; they may rebind this key.
                let tx = sender.lock().take();
                if let Some(tx) = tx {
                    // The caller may have dropped its Ready.
                    let _ = tx.send(result.clone().map_err(BindError::from));
                }
                match &result {
                    Ok(value) => {
                        if let Some(on_ready) = &on_ready {
                            on_ready(value);
                        }
                    }
                    Err(err) => {
                        if let Some(on_error) = &on_error {
                            on_error(err);
                        }
                    }
                }
            })
        };

        let signal = Arc::new(Self {
            key: key.to_string(),
            sender,
            once,
            on_error,
        });
        let ready = Ready {
            key: key.to_string(),
            rx,
        };
        (signal, ready)
    }

    fn ready(&self, value: ReadyValue) {
        self.once.call(Ok(value));
    }

    fn fail(&self, err: RemoteError) {
        warn!(key = %self.key, error = %err, "Remote subscription failed");
        if self.once.has_fired() {
            if let Some(on_error) = &self.on_error {
                on_error(&err);
            }
            return;
        }
        self.once.call(Err(err));
    }

    /// Drop the sender so a pending [`Ready`] resolves as unbound.
    fn abandon(&self) {
        self.sender.lock().take();
    }
}

/// Bind `source` to the state slot `key` of `dispatcher`.
///
/// Fails synchronously, without subscribing, when the source is neither a
/// document nor a query or when `key` is not declared. Any binding already
/// at `key` is torn down before the new subscription starts.
pub fn bind_snapshot<D: Dispatcher>(
    registry: &BindingRegistry,
    config: &MirrorConfig,
    dispatcher: &Arc<D>,
    key: &str,
    source: &dyn SnapshotSource,
    metadata: MetadataChanges,
    options: BindOptions,
) -> Result<Ready> {
    let shape = source.shape();
    if matches!(shape, SourceShape::Unsupported) {
        return Err(BindError::InvalidSource(key.to_string()));
    }
    if dispatcher.shape_of(key).is_none() {
        return Err(BindError::UndeclaredKey(key.to_string()));
    }

    registry.unbind(dispatcher, key);

    let weak = Arc::downgrade(dispatcher);
    let weak: Weak<dyn Dispatcher> = weak;
    let listen_options = ListenOptions::new(metadata);
    let include_path = options.include_path_or(config);
    let (signal, ready) = ReadySignal::new(key, &options);

    let (unsubscribe, detach) = match shape {
        SourceShape::Document(document) => {
            debug!(key = %key, collection = %document.parent(), "Binding document");
            bind_document(key, document, weak, listen_options, include_path, &signal)
        }
        SourceShape::Query(query) => {
            let wait = options.wait_or(config);
            debug!(key = %key, wait, "Binding query");
            bind_query(key, query, weak, listen_options, include_path, wait, &signal)
        }
        SourceShape::Unsupported => return Err(BindError::InvalidSource(key.to_string())),
    };

    let mut binding = Binding::unsubscribe(key, unsubscribe);
    binding.on_teardown(move || {
        detach();
        signal.abandon();
    });
    registry.bind(dispatcher, binding);

    Ok(ready)
}

type Detach = Box<dyn FnOnce() + Send>;

fn bind_document(
    key: &str,
    document: &dyn DocumentRef,
    dispatcher: Weak<dyn Dispatcher>,
    listen_options: ListenOptions,
    include_path: bool,
    signal: &Arc<ReadySignal>,
) -> (Unsubscribe, Detach) {
    let mirror = Arc::new(Mutex::new(SlotMirror::object(key, dispatcher)));

    let on_next = {
        let mirror = mirror.clone();
        let signal = signal.clone();
        Arc::new(move |doc: rsm_core::DocumentSnapshot| {
            let record = record_from_document(&doc, include_path);
            mirror.lock().apply(RemoteChange::ValueReplaced { record });
            signal.ready(ReadyValue::Document(doc));
        })
    };
    let on_error = {
        let mirror = mirror.clone();
        let signal = signal.clone();
        Arc::new(move |err: RemoteError| {
            mirror.lock().detach();
            signal.fail(err);
        })
    };

    let unsubscribe = document.listen(listen_options, on_next, on_error);
    (unsubscribe, Box::new(move || mirror.lock().detach()))
}

/// Query binding state shared by the fetch and the listener.
struct QueryMirror {
    mirror: SlotMirror,
    /// First delivered batch, held back until the slot is initialized.
    first_batch: Option<QuerySnapshot>,
}

impl QueryMirror {
    /// The ready value, once the slot is initialized and a batch arrived.
    fn ready_value(&self) -> Option<ReadyValue> {
        if !self.mirror.is_initialized() {
            return None;
        }
        self.first_batch.clone().map(ReadyValue::Query)
    }
}

fn bind_query(
    key: &str,
    query: &dyn QueryRef,
    dispatcher: Weak<dyn Dispatcher>,
    listen_options: ListenOptions,
    include_path: bool,
    wait: bool,
    signal: &Arc<ReadySignal>,
) -> (Unsubscribe, Detach) {
    let mut mirror = SlotMirror::array(key, dispatcher);
    if !wait {
        mirror.initialize();
    }
    let state = Arc::new(Mutex::new(QueryMirror {
        mirror,
        first_batch: None,
    }));

    let on_next = {
        let state = state.clone();
        let signal = signal.clone();
        Arc::new(move |snapshot: QuerySnapshot| {
            let ready = {
                let mut state = state.lock();
                for change in &snapshot.changes {
                    state
                        .mirror
                        .apply(RemoteChange::from_document_change(change, include_path));
                }
                if state.first_batch.is_none() {
                    state.first_batch = Some(snapshot);
                }
                state.ready_value()
            };
            if let Some(value) = ready {
                signal.ready(value);
            }
        })
    };
    let on_error = {
        let state = state.clone();
        let signal = signal.clone();
        Arc::new(move |err: RemoteError| {
            state.lock().mirror.detach();
            signal.fail(err);
        })
    };

    let unsubscribe = query.listen(listen_options, on_next, on_error);

    if wait {
        let state = state.clone();
        let signal = signal.clone();
        query.get(Box::new(move |result| match result {
            Ok(fetched) => {
                let ready = {
                    let mut state = state.lock();
                    state.mirror.initialize();
                    debug!(
                        key = %state.mirror.key(),
                        fetched = fetched.len(),
                        "Initial fetch resolved"
                    );
                    state.ready_value()
                };
                if let Some(value) = ready {
                    signal.ready(value);
                }
            }
            Err(err) => {
                state.lock().mirror.detach();
                signal.fail(err);
            }
        }));
    }

    (unsubscribe, Box::new(move || state.lock().mirror.detach()))
}
