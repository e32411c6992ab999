//! Binding of keyed-event sources.
//!
//! An array binding listens to four independent child streams. None of them
//! carries an index: positions are resolved against the binder's shadow
//! sequence from the element's key and its previous sibling's key.

use crate::config::{BindMode, BindOptions, MirrorConfig, ReadyValue};
use crate::dispatcher::Dispatcher;
use crate::error::{BindError, RemoteError, Result};
use crate::mirror::{desync, SlotMirror};
use crate::registry::{Binding, BindingRegistry};
use crate::source::{ErrorHandler, EventSource, EventType};
use parking_lot::Mutex;
use rsm_core::{
    insertion_index, move_index, record_from_data, DataSnapshot, IdentityField, RemoteChange,
    SlotShape,
};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

const FIELD: IdentityField = IdentityField::Key;

fn identity(snapshot: &DataSnapshot) -> &str {
    snapshot.key().unwrap_or_default()
}

/// Bind the keyed-event `source` to the state slot `key` of `dispatcher`.
///
/// The mode comes from `options.mode`, or from the slot's current shape when
/// unset: an array slot binds as an array, anything else as an object.
pub fn bind_events<D: Dispatcher>(
    registry: &BindingRegistry,
    config: &MirrorConfig,
    dispatcher: &Arc<D>,
    key: &str,
    source: Arc<dyn EventSource>,
    options: BindOptions,
) -> Result<()> {
    let shape = dispatcher
        .shape_of(key)
        .ok_or_else(|| BindError::UndeclaredKey(key.to_string()))?;
    let mode = options.mode.unwrap_or(match shape {
        SlotShape::Array => BindMode::AsArray,
        SlotShape::Object | SlotShape::Null => BindMode::AsObject,
    });

    registry.unbind(dispatcher, key);

    let weak = Arc::downgrade(dispatcher);
    let weak: Weak<dyn Dispatcher> = weak;
    let include_path = options.include_path_or(config);
    let wait = options.wait_or(config);
    debug!(key = %key, ?mode, wait, "Binding keyed-event source");

    let mirror = Arc::new(Mutex::new(match mode {
        BindMode::AsObject => SlotMirror::object(key, weak),
        BindMode::AsArray => SlotMirror::array(key, weak),
    }));

    let on_cancel: ErrorHandler = {
        let key = key.to_string();
        let mirror = mirror.clone();
        let callback = options.on_cancel.clone();
        Arc::new(move |err: RemoteError| {
            warn!(key = %key, error = %err, "Listener cancelled by remote source");
            mirror.lock().detach();
            if let Some(callback) = &callback {
                callback(&err);
            }
        })
    };

    let mut binding = Binding::listeners(key, source.clone());

    if mode == BindMode::AsArray {
        if wait {
            let mirror = mirror.clone();
            let key = key.to_string();
            source.once(
                EventType::Value,
                Box::new(move |result| match result {
                    Ok(_) => {
                        mirror.lock().initialize();
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "Initial load failed");
                        mirror.lock().detach();
                    }
                }),
            );
        } else {
            mirror.lock().initialize();
        }
    }

    if options.on_ready.is_some() || options.on_error.is_some() {
        let on_ready = options.on_ready.clone();
        let on_error = options.on_error.clone();
        let key = key.to_string();
        source.once(
            EventType::Value,
            Box::new(move |result| match result {
                Ok(snapshot) => {
                    if let Some(on_ready) = &on_ready {
                        on_ready(&ReadyValue::Data(snapshot));
                    }
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Remote source failed");
                    if let Some(on_error) = &on_error {
                        on_error(&err);
                    }
                }
            }),
        );
    }

    match mode {
        BindMode::AsObject => {
            let mirror = mirror.clone();
            let handle = source.on(
                EventType::Value,
                Arc::new(move |snapshot: &DataSnapshot, _previous: Option<&str>| {
                    let record = record_from_data(snapshot, include_path);
                    mirror.lock().apply(RemoteChange::ValueReplaced { record });
                }),
                on_cancel,
            );
            binding.add_listener(EventType::Value, handle);
        }
        BindMode::AsArray => {
            for event in EventType::CHILD_EVENTS {
                let mirror = mirror.clone();
                let handle = source.on(
                    event,
                    Arc::new(move |snapshot: &DataSnapshot, previous: Option<&str>| {
                        apply_child_event(
                            &mut mirror.lock(),
                            event,
                            snapshot,
                            previous,
                            include_path,
                        );
                    }),
                    on_cancel.clone(),
                );
                binding.add_listener(event, handle);
            }
        }
    }

    binding.on_teardown(move || mirror.lock().detach());
    registry.bind(dispatcher, binding);
    Ok(())
}

fn apply_child_event(
    mirror: &mut SlotMirror,
    event: EventType,
    snapshot: &DataSnapshot,
    previous: Option<&str>,
    include_path: bool,
) {
    let change = match event {
        EventType::ChildAdded => {
            let index = insertion_index(mirror.shadow(), FIELD, previous).unwrap_or_else(|| {
                desync(
                    mirror.key(),
                    &format!("previous sibling {:?} is not tracked", previous),
                )
            });
            RemoteChange::Added {
                index,
                record: record_from_data(snapshot, include_path),
            }
        }
        EventType::ChildRemoved => RemoteChange::Removed {
            index: mirror.position(FIELD, identity(snapshot)),
        },
        EventType::ChildChanged => {
            let index = mirror.position(FIELD, identity(snapshot));
            RemoteChange::Modified {
                old_index: index,
                new_index: index,
                record: record_from_data(snapshot, include_path),
            }
        }
        EventType::ChildMoved => {
            let old_index = mirror.position(FIELD, identity(snapshot));
            let new_index = move_index(mirror.shadow(), FIELD, old_index, previous)
                .unwrap_or_else(|| {
                    desync(
                        mirror.key(),
                        &format!("previous sibling {:?} is not tracked", previous),
                    )
                });
            RemoteChange::Moved {
                old_index,
                new_index,
            }
        }
        EventType::Value => return,
    };
    mirror.apply(change);
}
