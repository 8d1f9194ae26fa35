use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use kubernetes::{Api, Error, ErrorResponse, ObjectEvent, Resource};
use parking_lot::Mutex;
use serde_json::Value;

use crate::cache::Store;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Verb {
    Get,
    Create,
    Update,
}

/// A request the fake served.
#[derive(Clone, Debug)]
pub struct Action {
    pub verb: Verb,
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
    /// Request body of writes, `Null` for reads
    pub object: Value,
}

impl Action {
    pub fn is_write(&self) -> bool {
        self.verb != Verb::Get
    }
}

enum Injected {
    Error(u16),
    Panic,
}

type Mirror = Box<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct State {
    objects: BTreeMap<(&'static str, String, String), Value>,
    actions: Vec<Action>,
    failures: HashMap<(Verb, &'static str), VecDeque<Injected>>,
    mirrors: HashMap<&'static str, Mirror>,
    status_subresources: HashSet<&'static str>,
    revision: u64,
}

/// An in-memory api server.
///
/// Writes assign uids and resourceVersions the way the api server does,
/// updates carrying a stale resourceVersion fail with 409. Stores passed to
/// [`FakeClient::mirror`] see every write, as if an informer watched them.
#[derive(Clone, Default)]
pub struct FakeClient {
    state: Arc<Mutex<State>>,
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Api(ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    })
}

impl FakeClient {
    /// Keep `store` in line with the objects of its kind.
    pub fn mirror<R: Resource>(&self, store: Store<R>) {
        let mirror: Mirror = Box::new(move |value| {
            if let Ok(obj) = serde_json::from_value::<R>(value.clone()) {
                store.insert(Arc::new(obj));
            }
        });

        self.state.lock().mirrors.insert(R::KIND, mirror);
    }

    /// Updates of `R` leave the stored status alone, like the api server
    /// does for Deployments.
    pub fn status_subresource<R: Resource>(&self) {
        self.state.lock().status_subresources.insert(R::KIND);
    }

    /// Store `obj` without recording an action and return what was stored.
    pub fn seed<R: Resource>(&self, mut obj: R) -> R {
        let mut state = self.state.lock();
        state.revision += 1;
        let revision = state.revision;

        let metadata = obj.metadata_mut();
        if metadata.uid.is_empty() {
            metadata.uid = format!("uid-{}-{revision}", metadata.name);
        }
        metadata.resource_version = Some(revision.to_string());

        state.save(&obj);
        obj
    }

    /// Make the next `verb` on `R` fail with `code`.
    pub fn fail_next<R: Resource>(&self, verb: Verb, code: u16) {
        self.inject::<R>(verb, Injected::Error(code));
    }

    /// Make the next `verb` on `R` panic.
    pub fn panic_next<R: Resource>(&self, verb: Verb) {
        self.inject::<R>(verb, Injected::Panic);
    }

    fn inject<R: Resource>(&self, verb: Verb, injected: Injected) {
        self.state
            .lock()
            .failures
            .entry((verb, R::KIND))
            .or_default()
            .push_back(injected);
    }

    pub fn object<R: Resource>(&self, namespace: &str, name: &str) -> Option<R> {
        let state = self.state.lock();
        state
            .objects
            .get(&(R::KIND, namespace.to_string(), name.to_string()))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().actions.clone()
    }

    pub fn writes(&self) -> Vec<Action> {
        self.actions()
            .into_iter()
            .filter(|action| action.is_write() && action.kind != ObjectEvent::KIND)
            .collect()
    }

    pub fn clear_actions(&self) {
        self.state.lock().actions.clear();
    }

    /// Events written so far, oldest first.
    pub fn events(&self) -> Vec<ObjectEvent> {
        self.actions()
            .into_iter()
            .filter(|action| action.kind == ObjectEvent::KIND && action.verb == Verb::Create)
            .filter_map(|action| serde_json::from_value(action.object).ok())
            .collect()
    }

    fn begin<R: Resource>(
        &self,
        verb: Verb,
        namespace: &str,
        name: &str,
        obj: Option<&R>,
    ) -> Result<(), Error> {
        let injected = {
            let mut state = self.state.lock();
            state.actions.push(Action {
                verb,
                kind: R::KIND,
                namespace: namespace.to_string(),
                name: name.to_string(),
                object: obj
                    .and_then(|obj| serde_json::to_value(obj).ok())
                    .unwrap_or(Value::Null),
            });

            state
                .failures
                .get_mut(&(verb, R::KIND))
                .and_then(|queue| queue.pop_front())
        };

        match injected {
            None => Ok(()),
            Some(Injected::Error(code)) => Err(api_error(
                code,
                "Injected",
                format!("injected failure of {verb:?} {}", R::KIND),
            )),
            Some(Injected::Panic) => panic!("injected panic on {verb:?} {}", R::KIND),
        }
    }
}

impl State {
    fn save<R: Resource>(&mut self, obj: &R) {
        let metadata = obj.metadata();
        let key = (R::KIND, metadata.namespace.clone(), metadata.name.clone());

        if let Ok(value) = serde_json::to_value(obj) {
            if let Some(mirror) = self.mirrors.get(R::KIND) {
                mirror(&value);
            }
            self.objects.insert(key, value);
        }
    }

    fn load<R: Resource>(&self, namespace: &str, name: &str) -> Option<R> {
        self.objects
            .get(&(R::KIND, namespace.to_string(), name.to_string()))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

#[async_trait]
impl<R: Resource + Clone> Api<R> for FakeClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<R, Error> {
        self.begin::<R>(Verb::Get, namespace, name, None)?;

        self.state.lock().load(namespace, name).ok_or_else(|| {
            api_error(404, "NotFound", format!("{} {name:?} not found", R::KIND))
        })
    }

    async fn create(&self, namespace: &str, obj: &R) -> Result<R, Error> {
        let name = obj.metadata().name.clone();
        self.begin(Verb::Create, namespace, &name, Some(obj))?;

        let mut state = self.state.lock();
        if state.load::<R>(namespace, &name).is_some() {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} {name:?} already exists", R::KIND),
            ));
        }

        state.revision += 1;
        let revision = state.revision;

        let mut created = obj.clone();
        let metadata = created.metadata_mut();
        metadata.namespace = namespace.to_string();
        metadata.uid = format!("uid-{name}-{revision}");
        metadata.resource_version = Some(revision.to_string());

        state.save(&created);
        Ok(created)
    }

    async fn update(&self, namespace: &str, obj: &R) -> Result<R, Error> {
        let name = obj.metadata().name.clone();
        self.begin(Verb::Update, namespace, &name, Some(obj))?;

        let mut state = self.state.lock();
        let Some(stored) = state.load::<R>(namespace, &name) else {
            return Err(api_error(
                404,
                "NotFound",
                format!("{} {name:?} not found", R::KIND),
            ));
        };

        if let Some(expected) = &obj.metadata().resource_version {
            if stored.metadata().resource_version.as_ref() != Some(expected) {
                return Err(api_error(
                    409,
                    "Conflict",
                    "the object has been modified; please apply your changes to the latest version and try again".into(),
                ));
            }
        }

        state.revision += 1;
        let revision = state.revision;

        let mut updated = obj.clone();
        let metadata = updated.metadata_mut();
        metadata.namespace = namespace.to_string();
        metadata.uid = stored.metadata().uid.clone();
        metadata.resource_version = Some(revision.to_string());

        // kinds with a status subresource keep their status on update
        if state.status_subresources.contains(R::KIND) {
            let previous = state
                .objects
                .get(&(R::KIND, namespace.to_string(), name.clone()))
                .and_then(|value| value.get("status"))
                .cloned();

            let mut value = serde_json::to_value(&updated).map_err(Error::Serialize)?;
            if let Some(fields) = value.as_object_mut() {
                match previous {
                    Some(status) => fields.insert("status".to_string(), status),
                    None => fields.remove("status"),
                };
            }
            updated = serde_json::from_value(value).map_err(Error::Deserialize)?;
        }

        state.save(&updated);
        Ok(updated)
    }
}
