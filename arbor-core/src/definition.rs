//! Statechart definition types.
//!
//! Charts use a nested JSON DSL. The root object is itself a state:
//!
//! ```json
//! {
//!   "id": "order",
//!   "initial": "pending",
//!   "context": {"attempts": 0},
//!   "states": {
//!     "pending": {
//!       "on": {
//!         "PAY": [
//!           {"target": "paid", "guard": "event.data.amount >= 10"},
//!           {"actions": [
//!             {"type": "assign", "key": "attempts", "value": {"expr": "ctx.attempts + 1"}}
//!           ]}
//!         ]
//!       }
//!     },
//!     "paid": {
//!       "initial": "packing",
//!       "states": {
//!         "packing": {"on": {"PACKED": "shipping"}},
//!         "shipping": {"invoke": {"src": "courier"}, "on": {"shipping.done": "delivered"}}
//!       }
//!     },
//!     "delivered": {}
//!   }
//! }
//! ```
//!
//! State ids are the keys of `states` and must be unique across the whole
//! chart. Children are ordered by id.

use crate::action::Action;
use crate::error::CoreError;
use crate::guard::Guard;
use crate::invoke::InvokeDef;
use crate::value::ValueProvider;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Position of a state in the chart arena.
pub type StateIdx = usize;

/// A transition as written in the DSL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionRaw {
    /// Target state id. Absent for targetless transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

impl TransitionRaw {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    /// A transition that only runs actions.
    pub fn internal() -> Self {
        Self::default()
    }

    pub fn guarded(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// Transitions declared for one event, in priority order.
///
/// Accepts a target string, a transition object, or an array of either.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TransitionList(pub Vec<TransitionRaw>);

impl<'de> Deserialize<'de> for TransitionList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TransitionListVisitor;

        impl<'de> Visitor<'de> for TransitionListVisitor {
            type Value = TransitionList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a target string, a transition object, or an array of either")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(TransitionList(vec![TransitionRaw::to(v)]))
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let t = TransitionRaw::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(TransitionList(vec![t]))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut transitions = Vec::new();
                while let Some(TransitionItem(t)) = seq.next_element()? {
                    transitions.push(t);
                }
                Ok(TransitionList(transitions))
            }
        }

        deserializer.deserialize_any(TransitionListVisitor)
    }
}

/// One array element of a [`TransitionList`].
struct TransitionItem(TransitionRaw);

impl<'de> Deserialize<'de> for TransitionItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TransitionItemVisitor;

        impl<'de> Visitor<'de> for TransitionItemVisitor {
            type Value = TransitionItem;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a target string or a transition object")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(TransitionItem(TransitionRaw::to(v)))
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                TransitionRaw::deserialize(de::value::MapAccessDeserializer::new(map))
                    .map(TransitionItem)
            }
        }

        deserializer.deserialize_any(TransitionItemVisitor)
    }
}

/// A state as written in the DSL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateNodeRaw {
    /// Initial child. Required when `states` is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<Action>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<Action>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub on: BTreeMap<String, TransitionList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke: Option<InvokeDef>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<String, StateNodeRaw>,

    /// Keys the DSL does not know. A chart with any of them fails to build.
    /// Collected instead of denied because the root node is flattened into
    /// `ChartDefinitionRaw`.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl StateNodeRaw {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial(mut self, child: impl Into<String>) -> Self {
        self.initial = Some(child.into());
        self
    }

    pub fn child(mut self, id: impl Into<String>, state: StateNodeRaw) -> Self {
        self.states.insert(id.into(), state);
        self
    }

    pub fn on(mut self, event: impl Into<String>, transition: TransitionRaw) -> Self {
        self.on.entry(event.into()).or_default().0.push(transition);
        self
    }

    pub fn entry(mut self, action: Action) -> Self {
        self.entry.push(action);
        self
    }

    pub fn exit(mut self, action: Action) -> Self {
        self.exit.push(action);
        self
    }

    pub fn invoke(mut self, invoke: InvokeDef) -> Self {
        self.invoke = Some(invoke);
        self
    }
}

/// Raw chart definition as stored/transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDefinitionRaw {
    /// Chart id, also the id of the root state.
    pub id: String,

    #[serde(flatten)]
    pub root: StateNodeRaw,

    /// Default context, overridden key by key by the caller's initial data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ChartDefinitionRaw {
    pub fn new(id: impl Into<String>, root: StateNodeRaw) -> Self {
        Self {
            id: id.into(),
            root,
            context: None,
            meta: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// A built transition.
#[derive(Debug, Clone)]
pub struct Transition {
    /// State that declares the transition.
    pub source: StateIdx,
    pub event: String,
    pub target: Option<StateIdx>,
    pub guard: Option<Guard>,
    pub actions: Vec<Action>,
}

/// A built invocation descriptor with its id resolved.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: String,
    pub src: String,
    pub input: Option<ValueProvider>,
}

/// A state in the chart arena.
#[derive(Debug, Clone)]
pub struct StateNode {
    pub id: String,
    pub parent: Option<StateIdx>,
    /// Distance from the root.
    pub depth: usize,
    /// Children in id order.
    pub children: Vec<StateIdx>,
    pub initial: Option<StateIdx>,
    pub entry: Vec<Action>,
    pub exit: Vec<Action>,
    /// Transitions by event name, each list in declaration order.
    pub transitions: BTreeMap<String, Vec<Transition>>,
    pub invoke: Option<Invocation>,
}

impl StateNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Transitions declared for `event`, if any.
    pub fn transitions_for(&self, event: &str) -> Option<&[Transition]> {
        self.transitions.get(event).map(Vec::as_slice)
    }
}

/// Validated and indexed chart.
#[derive(Debug, Clone)]
pub struct Chart {
    states: Vec<StateNode>,
    index: HashMap<String, StateIdx>,
    default_context: Value,

    /// Original raw definition.
    pub raw: ChartDefinitionRaw,

    /// CRC32C of the canonical JSON form, as 8 hex digits.
    pub checksum: String,
}

impl Chart {
    /// Index of the root state.
    pub const ROOT: StateIdx = 0;

    /// Parses and validates a chart from JSON.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        let raw: ChartDefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Parses and validates a chart from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, CoreError> {
        let raw: ChartDefinitionRaw = serde_json::from_str(s)?;
        Self::from_raw(raw)
    }

    /// Builds a chart from raw parts.
    pub fn from_raw(raw: ChartDefinitionRaw) -> Result<Self, CoreError> {
        if raw.id.is_empty() {
            return Err(CoreError::invalid("chart id must not be empty"));
        }

        let default_context = match &raw.context {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(v @ Value::Object(_)) => v.clone(),
            Some(_) => return Err(CoreError::invalid("chart context must be a JSON object")),
        };

        // Lay out the arena depth-first so parents precede children.
        let mut builder = ArenaBuilder::default();
        builder.add(&raw.id, &raw.root, None, 0)?;
        let ArenaBuilder {
            mut states,
            index,
            nodes,
        } = builder;

        // Second pass: resolve initial children, targets and invocations.
        let mut invoke_ids = BTreeSet::new();
        for (idx, raw_node) in nodes.into_iter().enumerate() {
            states[idx].initial = resolve_initial(&states, &index, idx, raw_node)?;

            let mut transitions = BTreeMap::new();
            for (event, list) in &raw_node.on {
                if event.is_empty() {
                    return Err(CoreError::invalid(format!(
                        "state '{}' declares a transition on an empty event name",
                        states[idx].id
                    )));
                }
                let mut built = Vec::with_capacity(list.0.len());
                for t in &list.0 {
                    let target = match &t.target {
                        Some(target) => Some(*index.get(target).ok_or_else(|| {
                            CoreError::invalid(format!(
                                "transition '{}' from '{}' targets unknown state '{}'",
                                event, states[idx].id, target
                            ))
                        })?),
                        None => None,
                    };
                    built.push(Transition {
                        source: idx,
                        event: event.clone(),
                        target,
                        guard: t.guard.clone(),
                        actions: t.actions.clone(),
                    });
                }
                transitions.insert(event.clone(), built);
            }
            states[idx].transitions = transitions;

            if let Some(def) = &raw_node.invoke {
                if def.src.is_empty() {
                    return Err(CoreError::invalid(format!(
                        "invoke in state '{}' has an empty src",
                        states[idx].id
                    )));
                }
                let id = def.id.clone().unwrap_or_else(|| states[idx].id.clone());
                if !invoke_ids.insert(id.clone()) {
                    return Err(CoreError::invalid(format!("duplicate invoke id '{}'", id)));
                }
                states[idx].invoke = Some(Invocation {
                    id,
                    src: def.src.clone(),
                    input: def.input.clone(),
                });
            }
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            states,
            index,
            default_context,
            raw,
            checksum,
        })
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }

    pub fn id(&self) -> &str {
        &self.raw.id
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn default_context(&self) -> &Value {
        &self.default_context
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `idx` did not come from this chart.
    pub fn state(&self, idx: StateIdx) -> &StateNode {
        &self.states[idx]
    }

    pub fn states(&self) -> impl Iterator<Item = &StateNode> {
        self.states.iter()
    }

    /// Looks up a state by id.
    pub fn lookup(&self, id: &str) -> Option<StateIdx> {
        self.index.get(id).copied()
    }

    pub fn has_state(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Path from the root down to `idx`, inclusive.
    pub fn path_to(&self, idx: StateIdx) -> Vec<StateIdx> {
        let mut path = vec![idx];
        let mut current = idx;
        while let Some(parent) = self.states[current].parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Returns true if `idx` is `ancestor` or one of its descendants.
    pub fn is_within(&self, idx: StateIdx, ancestor: StateIdx) -> bool {
        let mut current = Some(idx);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.states[c].parent;
        }
        false
    }

    /// Initial descendants of `idx`, outermost first, excluding `idx`.
    pub fn initial_chain(&self, idx: StateIdx) -> Vec<StateIdx> {
        let mut chain = Vec::new();
        let mut current = idx;
        while let Some(initial) = self.states[current].initial {
            chain.push(initial);
            current = initial;
        }
        chain
    }

    /// Deepest state that is a proper ancestor of both `source` and `target`.
    ///
    /// `None` means the transition reaches above the root, so every active
    /// state is exited.
    pub fn transition_domain(&self, source: StateIdx, target: StateIdx) -> Option<StateIdx> {
        let mut candidate = self.states[source].parent;
        while let Some(c) = candidate {
            if target != c && self.is_within(target, c) {
                return Some(c);
            }
            candidate = self.states[c].parent;
        }
        None
    }

    /// Names of all predicates referenced by guards.
    pub fn predicate_names(&self) -> BTreeSet<&str> {
        self.states
            .iter()
            .flat_map(|s| s.transitions.values().flatten())
            .filter_map(|t| t.guard.as_ref().and_then(Guard::predicate_name))
            .collect()
    }

    /// Every event name with at least one transition somewhere in the chart.
    pub fn events(&self) -> BTreeSet<&str> {
        self.states
            .iter()
            .flat_map(|s| s.transitions.keys())
            .map(String::as_str)
            .collect()
    }
}

#[derive(Default)]
struct ArenaBuilder<'a> {
    states: Vec<StateNode>,
    index: HashMap<String, StateIdx>,
    /// Raw node of each arena entry, same order.
    nodes: Vec<&'a StateNodeRaw>,
}

impl<'a> ArenaBuilder<'a> {
    fn add(
        &mut self,
        id: &str,
        raw: &'a StateNodeRaw,
        parent: Option<StateIdx>,
        depth: usize,
    ) -> Result<StateIdx, CoreError> {
        if id.is_empty() {
            return Err(CoreError::invalid("state id must not be empty"));
        }
        if self.index.contains_key(id) {
            return Err(CoreError::invalid(format!("duplicate state id '{}'", id)));
        }
        if let Some(key) = raw.unknown.keys().next() {
            return Err(CoreError::invalid(format!(
                "state '{}' has unknown field '{}'",
                id, key
            )));
        }

        let idx = self.states.len();
        self.index.insert(id.to_string(), idx);
        self.nodes.push(raw);
        self.states.push(StateNode {
            id: id.to_string(),
            parent,
            depth,
            children: Vec::with_capacity(raw.states.len()),
            initial: None,
            entry: raw.entry.clone(),
            exit: raw.exit.clone(),
            transitions: BTreeMap::new(),
            invoke: None,
        });

        for (child_id, child) in &raw.states {
            let child_idx = self.add(child_id, child, Some(idx), depth + 1)?;
            self.states[idx].children.push(child_idx);
        }
        Ok(idx)
    }
}

fn resolve_initial(
    states: &[StateNode],
    index: &HashMap<String, StateIdx>,
    idx: StateIdx,
    raw: &StateNodeRaw,
) -> Result<Option<StateIdx>, CoreError> {
    let state = &states[idx];
    match (&raw.initial, state.is_leaf()) {
        (None, true) => Ok(None),
        (None, false) => Err(CoreError::invalid(format!(
            "composite state '{}' has no initial child",
            state.id
        ))),
        (Some(initial), true) => Err(CoreError::invalid(format!(
            "leaf state '{}' declares initial '{}'",
            state.id, initial
        ))),
        (Some(initial), false) => match index.get(initial) {
            Some(&child) if states[child].parent == Some(idx) => Ok(Some(child)),
            _ => Err(CoreError::invalid(format!(
                "initial '{}' of state '{}' is not one of its children",
                initial, state.id
            ))),
        },
    }
}
