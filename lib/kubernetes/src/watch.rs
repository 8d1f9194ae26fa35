use std::collections::VecDeque;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, error, warn};

use super::Resource;
use super::client::{Client, Error};
use super::client::{ListParams, WatchEvent, WatchParams};

const INITIAL_EVENTS_END: &str = "k8s.io/initial-events-end";

#[derive(Debug)]
pub enum Event<T> {
    /// An object was added or modified
    Apply(T),

    /// An object was deleted
    Deleted(T),

    /// The watch stream was restarted.
    ///
    /// A series of `InitApply` events are expected to follow until all matching objects
    /// have been listed. This event can be used to prepare a buffer for `InitApply` events.
    Init,

    /// Received an object during `Init`
    ///
    /// Objects returned here are either from the initial stream using the `StreamingList`
    /// strategy, or from pages using the `ListWatch` strategy.
    InitApply(T),

    /// The initialisation is complete
    ///
    /// Any objects that were previously applied but are not listed in any of the
    /// `InitApply` events should be assumed to have been Deleted
    InitDone,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum InitialListStrategy {
    /// Paginated list, then watch from the list's resourceVersion
    #[default]
    ListWatch,
    /// A single watch with `sendInitialEvents=true`, stable since 1.32
    StreamingList,
}

enum State<R: Resource> {
    Start {
        resource_version: Option<String>,
    },
    Listing {
        continue_token: Option<String>,
        objects: VecDeque<R>,
        last_bookmark: Option<String>,
    },
    InitialWatch {
        params: WatchParams,
        resource_version: Option<String>,
        initial_list_done: bool,
    },
    Watching {
        resource_version: String,
        stream: BoxStream<'static, Result<WatchEvent<R>, Error>>,
        initial_list_done: bool,
    },
}

/// Objects per page of the initial list
const LIST_PAGE_SIZE: u32 = 500;

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub timeout: Option<u32>,
    pub initial_list_strategy: InitialListStrategy,
    pub bookmark: bool,
}

impl Config {
    fn list_params(&self, continue_token: Option<String>) -> ListParams {
        ListParams {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            timeout: self.timeout,
            limit: Some(LIST_PAGE_SIZE),
            continue_token,
            resource_version: Some("0".to_string()),
        }
    }

    fn watch_params(&self, send_initial_events: bool) -> WatchParams {
        WatchParams {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            timeout: self.timeout,
            bookmarks: self.bookmark || send_initial_events,
            send_initial_events,
        }
    }

    fn restart<R: Resource>(&self) -> State<R> {
        State::Start {
            resource_version: None,
        }
    }
}

/// Watches a Kubernetes Resource for changes continuously.
///
/// Errors are yielded and the stream goes on, the next poll restarts from
/// the point where it failed, or from a full list when the resourceVersion
/// is gone. Callers should back off between errors.
pub fn watcher<R: Resource>(
    client: Client,
    config: Config,
) -> impl Stream<Item = Result<Event<R>, Error>> + Send {
    let initial_state = State::Start {
        resource_version: None,
    };

    futures::stream::unfold(
        (client, config, initial_state),
        |(client, config, mut state)| async {
            loop {
                let (result, new_state) = step(&client, &config, state).await;
                state = new_state;

                if let Some(result) = result {
                    return Some((result, (client, config, state)));
                }
            }
        },
    )
}

async fn step<R: Resource>(
    client: &Client,
    config: &Config,
    state: State<R>,
) -> (Option<Result<Event<R>, Error>>, State<R>) {
    match state {
        State::Start { resource_version } => {
            let new_state = match config.initial_list_strategy {
                InitialListStrategy::ListWatch => State::Listing {
                    continue_token: None,
                    objects: VecDeque::new(),
                    last_bookmark: None,
                },
                InitialListStrategy::StreamingList => State::InitialWatch {
                    params: config.watch_params(true),
                    resource_version,
                    initial_list_done: false,
                },
            };

            (Some(Ok(Event::Init)), new_state)
        }
        State::Listing {
            continue_token,
            mut objects,
            last_bookmark,
        } => {
            if let Some(obj) = objects.pop_front() {
                return (
                    Some(Ok(Event::InitApply(obj))),
                    State::Listing {
                        continue_token,
                        objects,
                        last_bookmark,
                    },
                );
            }

            if continue_token.is_none() {
                if let Some(resource_version) = last_bookmark {
                    // the last page is drained
                    debug!(message = "list done, start watching", kind = R::KIND);

                    return (
                        Some(Ok(Event::InitDone)),
                        State::InitialWatch {
                            params: config.watch_params(false),
                            resource_version: Some(resource_version),
                            initial_list_done: true,
                        },
                    );
                }
            }

            match client.list(&config.list_params(continue_token)).await {
                Ok(list) => (
                    None,
                    State::Listing {
                        continue_token: list.metadata.r#continue.filter(|token| !token.is_empty()),
                        objects: VecDeque::from(list.items),
                        last_bookmark: list.metadata.resource_version.or(last_bookmark),
                    },
                ),
                Err(err) => (Some(Err(err)), config.restart()),
            }
        }
        State::InitialWatch {
            params,
            resource_version,
            initial_list_done,
        } => {
            let version = resource_version.as_deref().unwrap_or("0");
            match client.watch::<R>(&params, version).await {
                Ok(stream) => (
                    None,
                    State::Watching {
                        resource_version: resource_version.unwrap_or_else(|| "0".to_string()),
                        stream,
                        initial_list_done,
                    },
                ),
                Err(err) => {
                    let new_state = match &err {
                        Error::Api(resp) if resp.code == 410 => config.restart(),
                        Error::Api(resp) if resp.code == 403 => {
                            warn!(message = "watch forbidden", kind = R::KIND, ?resp);
                            State::InitialWatch {
                                params,
                                resource_version,
                                initial_list_done,
                            }
                        }
                        _ if initial_list_done => State::InitialWatch {
                            params,
                            resource_version,
                            initial_list_done,
                        },
                        _ => config.restart(),
                    };

                    (Some(Err(err)), new_state)
                }
            }
        }
        State::Watching {
            mut stream,
            resource_version,
            initial_list_done,
        } => match stream.next().await {
            Some(Ok(event)) => watch_event(config, event, stream, resource_version, initial_list_done),
            Some(Err(err)) => {
                // the connection is broken, resume from the last seen version
                let new_state = if initial_list_done {
                    State::InitialWatch {
                        params: config.watch_params(false),
                        resource_version: Some(resource_version),
                        initial_list_done,
                    }
                } else {
                    config.restart()
                };

                (Some(Err(err)), new_state)
            }
            None => {
                debug!(message = "watch stream closed", kind = R::KIND, timeout = config.timeout);

                let new_state = if initial_list_done {
                    State::InitialWatch {
                        params: config.watch_params(false),
                        resource_version: Some(resource_version),
                        initial_list_done,
                    }
                } else {
                    // the initial events are incomplete, start over
                    config.restart()
                };

                (None, new_state)
            }
        },
    }
}

fn watch_event<R: Resource>(
    config: &Config,
    event: WatchEvent<R>,
    stream: BoxStream<'static, Result<WatchEvent<R>, Error>>,
    resource_version: String,
    initial_list_done: bool,
) -> (Option<Result<Event<R>, Error>>, State<R>) {
    let (result, resource_version, initial_list_done) = match event {
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
            let resource_version = obj
                .metadata()
                .resource_version
                .clone()
                .unwrap_or(resource_version);

            let event = if initial_list_done {
                Event::Apply(obj)
            } else {
                Event::InitApply(obj)
            };

            (Some(Ok(event)), resource_version, initial_list_done)
        }
        WatchEvent::Deleted(obj) => {
            if !initial_list_done {
                // Kubernetes claims these events are impossible
                // https://kubernetes.io/docs/reference/using-api/api-concepts/#streaming-lists
                error!(message = "got deleted event during initial watch", kind = R::KIND);
            }

            let resource_version = obj
                .metadata()
                .resource_version
                .clone()
                .unwrap_or(resource_version);

            (Some(Ok(Event::Deleted(obj))), resource_version, initial_list_done)
        }
        WatchEvent::Bookmark(bookmark) => {
            let done = !initial_list_done
                && bookmark
                    .metadata
                    .annotations
                    .get(INITIAL_EVENTS_END)
                    .is_some_and(|value| value == "true");

            let event = if done {
                debug!(message = "initial list done", kind = R::KIND);
                Some(Ok(Event::InitDone))
            } else {
                None
            };

            (
                event,
                bookmark.metadata.resource_version,
                initial_list_done || done,
            )
        }
        WatchEvent::Error(err) => {
            // HTTP GONE, means we have desynced and need to start over and re-list
            if err.code == 410 {
                debug!(message = "resource version expired, relist", kind = R::KIND, ?err);
                return (Some(Err(Error::Api(err))), config.restart());
            }

            if err.code == 403 {
                warn!(message = "watch event error", kind = R::KIND, ?err);
            } else {
                debug!(message = "watch event error", kind = R::KIND, ?err);
            }

            (Some(Err(Error::Api(err))), resource_version, initial_list_done)
        }
    };

    (
        result,
        State::Watching {
            resource_version,
            stream,
            initial_list_done,
        },
    )
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::client::{Bookmark, BookmarkMeta, ErrorResponse};
    use crate::resource::deployment::Deployment;

    fn deployment(name: &str, rv: &str) -> Deployment {
        let mut deployment = Deployment::default();
        deployment.metadata.name = name.into();
        deployment.metadata.resource_version = Some(rv.into());
        deployment
    }

    fn empty() -> BoxStream<'static, Result<WatchEvent<Deployment>, Error>> {
        stream::empty().boxed()
    }

    #[test]
    fn apply_tracks_resource_version() {
        let (result, state) = watch_event(
            &Config::default(),
            WatchEvent::Modified(deployment("web", "20")),
            empty(),
            "10".into(),
            true,
        );

        assert!(matches!(result, Some(Ok(Event::Apply(_)))));
        match state {
            State::Watching {
                resource_version, ..
            } => assert_eq!(resource_version, "20"),
            _ => panic!("expect watching"),
        }
    }

    #[test]
    fn initial_events_end() {
        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(INITIAL_EVENTS_END.to_string(), "true".to_string());

        let (result, state) = watch_event(
            &Config::default(),
            WatchEvent::<Deployment>::Bookmark(Bookmark {
                metadata: BookmarkMeta {
                    resource_version: "30".into(),
                    annotations,
                },
            }),
            empty(),
            "10".into(),
            false,
        );

        assert!(matches!(result, Some(Ok(Event::InitDone))));
        match state {
            State::Watching {
                resource_version,
                initial_list_done,
                ..
            } => {
                assert_eq!(resource_version, "30");
                assert!(initial_list_done);
            }
            _ => panic!("expect watching"),
        }
    }

    #[test]
    fn gone_restarts() {
        let (result, state) = watch_event::<Deployment>(
            &Config::default(),
            WatchEvent::Error(ErrorResponse {
                status: "Failure".into(),
                message: "too old resource version".into(),
                reason: "Expired".into(),
                code: 410,
            }),
            empty(),
            "10".into(),
            true,
        );

        assert!(matches!(result, Some(Err(Error::Api(_)))));
        assert!(matches!(state, State::Start { .. }));
    }
}
