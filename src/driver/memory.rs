//! # In-Memory Remote
//!
//! A simulated eventually-consistent control plane for machine images, and a
//! [`ResourceDriver`] over it. Used by the test suite and handy for exercising
//! reconciler behaviour without network access.
//!
//! Each image follows a scripted list of states, advanced by one step per
//! `describe`. Freshly registered images can stay invisible for a number of
//! describes to mimic read-after-write lag. Every call is recorded in order and
//! failures can be queued per operation or pinned to a snapshot.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{
    ErrorClass, FieldChange, RemoteError, ResourceDriver, RuleClassifier, StateModel, UpdatePlan,
};
use crate::convergence::Observation;

pub const IMAGE_NOT_FOUND: &str = "InvalidImageID.NotFound";
pub const SNAPSHOT_NOT_FOUND: &str = "InvalidSnapshot.NotFound";

/// Remote API operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOperation {
    Register,
    Describe,
    Modify,
    Deregister,
    DeleteSnapshot,
}

/// One recorded remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteCall {
    Register { name: String },
    Describe { resource_id: String },
    Modify { resource_id: String, field: String },
    Deregister { resource_id: String },
    DeleteSnapshot { snapshot_id: String },
}

impl RemoteCall {
    pub fn operation(&self) -> RemoteOperation {
        match self {
            Self::Register { .. } => RemoteOperation::Register,
            Self::Describe { .. } => RemoteOperation::Describe,
            Self::Modify { .. } => RemoteOperation::Modify,
            Self::Deregister { .. } => RemoteOperation::Deregister,
            Self::DeleteSnapshot { .. } => RemoteOperation::DeleteSnapshot,
        }
    }
}

#[derive(Debug)]
struct SimulatedImage {
    state: String,
    upcoming: VecDeque<String>,
    hidden_describes: u32,
    attributes: Map<String, Value>,
    snapshots: Vec<String>,
    deregistered: bool,
}

impl SimulatedImage {
    fn advance(&mut self) -> &str {
        if let Some(next) = self.upcoming.pop_front() {
            self.state = next;
        }
        &self.state
    }
}

#[derive(Debug)]
struct RemoteInner {
    images: BTreeMap<String, SimulatedImage>,
    snapshots: BTreeSet<String>,
    calls: Vec<RemoteCall>,
    injected: HashMap<RemoteOperation, VecDeque<RemoteError>>,
    snapshot_failures: HashMap<String, RemoteError>,
    creation_script: Vec<String>,
    deletion_script: Vec<String>,
    visibility_lag: u32,
}

impl Default for RemoteInner {
    fn default() -> Self {
        Self {
            images: BTreeMap::new(),
            snapshots: BTreeSet::new(),
            calls: Vec::new(),
            injected: HashMap::new(),
            snapshot_failures: HashMap::new(),
            creation_script: vec!["pending".to_string(), "available".to_string()],
            deletion_script: Vec::new(),
            visibility_lag: 0,
        }
    }
}

impl RemoteInner {
    /// Record the call, then surface a queued failure for its operation if any
    fn enter(&mut self, call: RemoteCall) -> Result<(), RemoteError> {
        let operation = call.operation();
        self.calls.push(call);
        match self.injected.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn live_image(&mut self, resource_id: &str) -> Result<&mut SimulatedImage, RemoteError> {
        match self.images.get_mut(resource_id) {
            Some(image) if !image.deregistered => Ok(image),
            _ => Err(image_not_found(resource_id)),
        }
    }
}

fn image_not_found(resource_id: &str) -> RemoteError {
    RemoteError::new(IMAGE_NOT_FOUND, format!("The image id '[{resource_id}]' does not exist"))
}

fn to_states<I, S>(states: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    states.into_iter().map(Into::into).collect()
}

/// Shared handle to the simulated control plane; clones see the same state
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<RemoteInner>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// States reported by images registered from now on, one per describe
    pub fn with_creation_script<I, S>(self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.lock().creation_script = to_states(states);
        self
    }

    /// States reported after deregistration; once exhausted the image disappears
    pub fn with_deletion_script<I, S>(self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.lock().deletion_script = to_states(states);
        self
    }

    /// Number of describes for which a newly registered image reports not-found
    pub fn with_visibility_lag(self, describes: u32) -> Self {
        self.inner.lock().visibility_lag = describes;
        self
    }

    /// Seed an existing image that will keep reporting `state`
    pub fn insert_image<I, S>(&self, resource_id: &str, state: &str, snapshots: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let snapshots = to_states(snapshots);
        let mut inner = self.inner.lock();
        inner.snapshots.extend(snapshots.iter().cloned());
        inner.images.insert(
            resource_id.to_string(),
            SimulatedImage {
                state: state.to_string(),
                upcoming: VecDeque::new(),
                hidden_describes: 0,
                attributes: Map::new(),
                snapshots,
                deregistered: false,
            },
        );
    }

    /// Replace the states an existing image will report next
    pub fn script_states<I, S>(&self, resource_id: &str, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(image) = self.inner.lock().images.get_mut(resource_id) {
            image.upcoming = to_states(states).into();
        }
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: RemoteOperation, error: RemoteError) {
        self.fail_times(operation, error, 1);
    }

    pub fn fail_times(&self, operation: RemoteOperation, error: RemoteError, times: usize) {
        let mut inner = self.inner.lock();
        let queue = inner.injected.entry(operation).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Every deletion of `snapshot_id` fails with `error`
    pub fn fail_snapshot(&self, snapshot_id: &str, error: RemoteError) {
        self.inner
            .lock()
            .snapshot_failures
            .insert(snapshot_id.to_string(), error);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().calls.clone()
    }

    pub fn call_count(&self, operation: RemoteOperation) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    /// Current state without recording a call or advancing the script
    pub fn peek_state(&self, resource_id: &str) -> Option<String> {
        self.inner
            .lock()
            .images
            .get(resource_id)
            .map(|image| image.state.clone())
    }

    pub fn attributes(&self, resource_id: &str) -> Option<Map<String, Value>> {
        self.inner
            .lock()
            .images
            .get(resource_id)
            .map(|image| image.attributes.clone())
    }

    pub fn has_image(&self, resource_id: &str) -> bool {
        self.inner.lock().images.contains_key(resource_id)
    }

    pub fn has_snapshot(&self, snapshot_id: &str) -> bool {
        self.inner.lock().snapshots.contains(snapshot_id)
    }

    pub fn register(
        &self,
        name: &str,
        attributes: Map<String, Value>,
        snapshots: Vec<String>,
    ) -> Result<String, RemoteError> {
        let mut inner = self.inner.lock();
        inner.enter(RemoteCall::Register {
            name: name.to_string(),
        })?;

        let resource_id = format!("ami-{}", Uuid::new_v4().simple());
        let image = SimulatedImage {
            state: "pending".to_string(),
            upcoming: inner.creation_script.iter().cloned().collect(),
            hidden_describes: inner.visibility_lag,
            attributes,
            snapshots: snapshots.clone(),
            deregistered: false,
        };
        inner.snapshots.extend(snapshots);
        inner.images.insert(resource_id.clone(), image);

        debug!(resource_id = %resource_id, name = %name, "Simulated image registered");
        Ok(resource_id)
    }

    pub fn describe(&self, resource_id: &str) -> Result<(String, Map<String, Value>), RemoteError> {
        let mut inner = self.inner.lock();
        inner.enter(RemoteCall::Describe {
            resource_id: resource_id.to_string(),
        })?;

        let image = inner
            .images
            .get_mut(resource_id)
            .ok_or_else(|| image_not_found(resource_id))?;

        if image.hidden_describes > 0 {
            image.hidden_describes -= 1;
            return Err(image_not_found(resource_id));
        }

        if image.deregistered && image.upcoming.is_empty() {
            inner.images.remove(resource_id);
            return Err(image_not_found(resource_id));
        }

        let state = image.advance().to_string();
        Ok((state, image.attributes.clone()))
    }

    pub fn modify(&self, resource_id: &str, field: &str, value: Value) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.enter(RemoteCall::Modify {
            resource_id: resource_id.to_string(),
            field: field.to_string(),
        })?;

        let image = inner.live_image(resource_id)?;
        match field.strip_prefix("tags.") {
            Some(tag) => {
                let tags = image
                    .attributes
                    .entry("tags")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(tags) = tags {
                    tags.insert(tag.to_string(), value);
                }
            }
            None => {
                image.attributes.insert(field.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn deregister(&self, resource_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.enter(RemoteCall::Deregister {
            resource_id: resource_id.to_string(),
        })?;

        let deletion_script: VecDeque<String> = inner.deletion_script.iter().cloned().collect();
        let image = inner.live_image(resource_id)?;
        image.deregistered = true;
        image.upcoming = deletion_script;
        Ok(())
    }

    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.enter(RemoteCall::DeleteSnapshot {
            snapshot_id: snapshot_id.to_string(),
        })?;

        if let Some(error) = inner.snapshot_failures.get(snapshot_id) {
            return Err(error.clone());
        }
        if !inner.snapshots.remove(snapshot_id) {
            return Err(RemoteError::new(
                SNAPSHOT_NOT_FOUND,
                format!("The snapshot '{snapshot_id}' does not exist."),
            ));
        }
        Ok(())
    }

    /// Snapshots backing an image; empty once the image is unknown
    pub fn snapshots_of(&self, resource_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .images
            .get(resource_id)
            .map(|image| image.snapshots.clone())
            .unwrap_or_default()
    }
}

/// Desired state of a simulated machine image
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    /// Snapshots created with the image and deleted with it
    pub snapshot_ids: Vec<String>,
}

impl ImageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_ids.push(snapshot_id.into());
        self
    }
}

/// Image driver over a [`MemoryRemote`]
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    remote: MemoryRemote,
    states: StateModel,
    classifier: RuleClassifier,
    mutate_classifier: RuleClassifier,
}

impl MemoryDriver {
    pub fn new(remote: MemoryRemote) -> Self {
        Self {
            remote,
            states: StateModel::new(["pending"], "available")
                .with_deleting(["available", "pending", "failed"])
                .with_gone(["deregistered"]),
            classifier: RuleClassifier::standard(),
            mutate_classifier: RuleClassifier::rejections_only(),
        }
    }

    pub fn with_classifier(mut self, classifier: RuleClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_mutate_classifier(mut self, classifier: RuleClassifier) -> Self {
        self.mutate_classifier = classifier;
        self
    }

    pub fn with_state_model(mut self, states: StateModel) -> Self {
        self.states = states;
        self
    }

    pub fn remote(&self) -> &MemoryRemote {
        &self.remote
    }
}

#[async_trait]
impl ResourceDriver for MemoryDriver {
    type Desired = ImageSpec;
    type Error = RemoteError;

    fn kind(&self) -> &str {
        "image"
    }

    fn state_model(&self) -> &StateModel {
        &self.states
    }

    async fn mutate(&self, desired: &ImageSpec) -> Result<String, RemoteError> {
        let mut attributes = Map::new();
        attributes.insert("name".to_string(), Value::String(desired.name.clone()));
        self.remote
            .register(&desired.name, attributes, desired.snapshot_ids.clone())
    }

    async fn observe(&self, resource_id: &str) -> Result<Option<Observation>, RemoteError> {
        match self.remote.describe(resource_id) {
            Ok((state, attributes)) => Ok(Some(
                Observation::new(resource_id, state).with_attributes(Value::Object(attributes)),
            )),
            Err(error) if error.code == IMAGE_NOT_FOUND => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn delete(&self, resource_id: &str) -> Result<(), RemoteError> {
        match self.remote.deregister(resource_id) {
            // A repeated deregister after a lost response finds nothing to do
            Err(error) if error.code == IMAGE_NOT_FOUND => Ok(()),
            other => other,
        }
    }

    fn update_plan(&self, _resource_id: &str, desired: &ImageSpec) -> UpdatePlan {
        let tags = desired
            .tags
            .iter()
            .map(|(key, value)| FieldChange::new(format!("tags.{key}"), Value::String(value.clone())));

        let plan = UpdatePlan::new().group(tags);
        match &desired.description {
            Some(description) => plan.field("description", Value::String(description.clone())),
            None => plan,
        }
    }

    async fn mutate_field(&self, resource_id: &str, change: &FieldChange) -> Result<(), RemoteError> {
        self.remote
            .modify(resource_id, &change.field, change.value.clone())
    }

    async fn dependents(&self, resource_id: &str) -> Result<Vec<String>, RemoteError> {
        Ok(self.remote.snapshots_of(resource_id))
    }

    async fn delete_sub_resource(&self, key: &str) -> Result<(), RemoteError> {
        self.remote.delete_snapshot(key)
    }

    fn classify_error(&self, error: &RemoteError) -> ErrorClass {
        self.classifier.classify(error)
    }

    fn classify_mutate_error(&self, error: &RemoteError) -> ErrorClass {
        self.mutate_classifier.classify(error)
    }
}
