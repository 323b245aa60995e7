//! In-memory RO-Crate graph document
//!
//! Every property value is parsed into a [`PropertyValue`] so pipelines
//! match on its shape instead of probing raw JSON. Values that fit none of
//! the modelled shapes are kept verbatim as `Opaque`, which keeps foreign
//! data lossless across a parse/serialize cycle.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use crate::error::SyncError;
use crate::id::{collect_json_references, rewrite_json_references};
use crate::vocab::{
    CONFORMS_TO, DATASET_TYPE, FILE_TYPE, HAS_PART, METADATA_DESCRIPTOR_ID, NAME, ROCRATE_PROFILE,
    ROOT_ENTITY_ID,
};

/// A single literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(Number),
    Bool(bool),
}

impl Scalar {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Lexical form of the value, whatever its JSON type
    pub fn lexical(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Number(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Number(n) => Some(Scalar::Number(n.clone())),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::Bool(b) => Value::Bool(*b),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

/// Value of one entity property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
    Reference(String),
    References(Vec<String>),
    /// Anything else (embedded objects, mixed arrays, null)
    Opaque(Value),
}

fn reference_target(value: &Value) -> Option<&str> {
    match value {
        Value::Object(obj) if obj.len() == 1 => obj.get("@id").and_then(Value::as_str),
        _ => None,
    }
}

fn reference_json(id: &str) -> Value {
    let mut obj = Map::new();
    obj.insert("@id".to_string(), Value::String(id.to_string()));
    Value::Object(obj)
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Scalar(Scalar::Text(value.into()))
    }

    pub fn reference(id: impl Into<String>) -> Self {
        PropertyValue::Reference(id.into())
    }

    /// One value becomes a bare scalar, two or more a list, none nothing
    pub fn from_texts(values: Vec<String>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.into_iter().next().map(PropertyValue::text),
            _ => Some(PropertyValue::List(
                values.into_iter().map(Scalar::Text).collect(),
            )),
        }
    }

    /// Same collapsing rule as [`PropertyValue::from_texts`], for references
    pub fn from_references(ids: Vec<String>) -> Option<Self> {
        match ids.len() {
            0 => None,
            1 => ids.into_iter().next().map(PropertyValue::Reference),
            _ => Some(PropertyValue::References(ids)),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        if let Some(scalar) = Scalar::from_json(value) {
            return PropertyValue::Scalar(scalar);
        }
        if let Some(id) = reference_target(value) {
            return PropertyValue::Reference(id.to_string());
        }
        if let Value::Array(items) = value {
            let scalars: Option<Vec<Scalar>> = items.iter().map(Scalar::from_json).collect();
            if let Some(scalars) = scalars {
                return PropertyValue::List(scalars);
            }
            let refs: Option<Vec<String>> = items
                .iter()
                .map(|item| reference_target(item).map(str::to_string))
                .collect();
            if let Some(refs) = refs {
                return PropertyValue::References(refs);
            }
        }
        PropertyValue::Opaque(value.clone())
    }

    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Scalar(s) => s.to_json(),
            PropertyValue::List(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
            PropertyValue::Reference(id) => reference_json(id),
            PropertyValue::References(ids) => {
                Value::Array(ids.iter().map(|id| reference_json(id)).collect())
            }
            PropertyValue::Opaque(v) => v.clone(),
        }
    }

    /// Number of values, as the multiplicity rule counts them
    pub fn count(&self) -> usize {
        match self {
            PropertyValue::Scalar(_) | PropertyValue::Reference(_) => 1,
            PropertyValue::List(items) => items.len(),
            PropertyValue::References(ids) => ids.len(),
            PropertyValue::Opaque(Value::Array(items)) => items.len(),
            PropertyValue::Opaque(Value::Null) => 0,
            PropertyValue::Opaque(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Literal values; references and opaque values yield nothing
    pub fn scalars(&self) -> Vec<&Scalar> {
        match self {
            PropertyValue::Scalar(s) => vec![s],
            PropertyValue::List(items) => items.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Targets of `Reference`/`References` values
    pub fn reference_ids(&self) -> Vec<&str> {
        match self {
            PropertyValue::Reference(id) => vec![id.as_str()],
            PropertyValue::References(ids) => ids.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Every id this value points at, including ids nested in opaque JSON
    pub fn referenced_ids(&self) -> Vec<String> {
        match self {
            PropertyValue::Opaque(v) => {
                let mut out = Vec::new();
                collect_json_references(v, &mut out);
                out
            }
            other => other.reference_ids().into_iter().map(str::to_string).collect(),
        }
    }

    /// Append a reference, turning a bare reference into a list
    ///
    /// Returns false if the id was already referenced or the value holds
    /// literals.
    pub fn push_reference(&mut self, id: &str) -> bool {
        self.insert_reference(usize::MAX, id)
    }

    /// Insert a reference at `index` (clamped), collapsing per multiplicity
    pub fn insert_reference(&mut self, index: usize, id: &str) -> bool {
        let mut ids: Vec<String> = match self {
            PropertyValue::Reference(existing) => vec![existing.clone()],
            PropertyValue::References(existing) => existing.clone(),
            PropertyValue::List(items) if items.is_empty() => Vec::new(),
            _ => return false,
        };
        if ids.iter().any(|existing| existing == id) {
            return false;
        }
        ids.insert(index.min(ids.len()), id.to_string());
        if let Some(updated) = PropertyValue::from_references(ids) {
            *self = updated;
        }
        true
    }

    /// Drop every reference to `id`; returns true if anything was removed
    pub fn remove_reference(&mut self, id: &str) -> bool {
        match self {
            PropertyValue::Reference(existing) if existing == id => {
                *self = PropertyValue::References(Vec::new());
                true
            }
            PropertyValue::References(ids) => {
                let before = ids.len();
                ids.retain(|existing| existing != id);
                if ids.len() == before {
                    return false;
                }
                if ids.len() == 1 {
                    *self = PropertyValue::Reference(ids[0].clone());
                }
                true
            }
            PropertyValue::Opaque(Value::Array(items)) => {
                let before = items.len();
                items.retain(|item| reference_target(item) != Some(id));
                before != items.len()
            }
            _ => false,
        }
    }

    /// Rename referenced ids according to `map`
    pub fn rewrite_references(&mut self, map: &HashMap<String, String>) {
        match self {
            PropertyValue::Reference(id) => {
                if let Some(new_id) = map.get(id) {
                    *id = new_id.clone();
                }
            }
            PropertyValue::References(ids) => {
                for id in ids.iter_mut() {
                    if let Some(new_id) = map.get(id) {
                        *id = new_id.clone();
                    }
                }
            }
            PropertyValue::Opaque(v) => rewrite_json_references(v, map),
            PropertyValue::Scalar(_) | PropertyValue::List(_) => {}
        }
    }
}

/// A node of the graph: id, types and an ordered property bag
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEntity {
    pub id: String,
    pub types: Vec<String>,
    pub properties: IndexMap<String, PropertyValue>,
}

impl GraphEntity {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            types: vec![entity_type.into()],
            properties: IndexMap::new(),
        }
    }

    pub fn has_type(&self, entity_type: &str) -> bool {
        self.types.iter().any(|t| t == entity_type)
    }

    pub fn type_label(&self) -> String {
        self.types.join(", ")
    }

    pub fn is_file(&self) -> bool {
        self.has_type(FILE_TYPE)
    }

    pub fn is_dataset(&self) -> bool {
        self.has_type(DATASET_TYPE)
    }

    pub fn is_data_entity(&self) -> bool {
        self.is_file() || self.is_dataset()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PropertyValue> {
        self.properties.get_mut(key)
    }

    /// Set a property; an existing key keeps its position
    pub fn set(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.properties.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Text of a single-valued literal property
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(PropertyValue::Scalar(s)) => s.as_text(),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.text(NAME)
    }

    /// Ids listed in `hasPart`, whatever shape it has
    pub fn has_part(&self) -> Vec<&str> {
        self.properties
            .get(HAS_PART)
            .map(PropertyValue::reference_ids)
            .unwrap_or_default()
    }

    /// Append `id` to `hasPart` unless already present
    pub fn add_part(&mut self, id: &str) -> bool {
        match self.properties.get_mut(HAS_PART) {
            Some(value) => value.push_reference(id),
            None => {
                self.properties
                    .insert(HAS_PART.to_string(), PropertyValue::reference(id));
                true
            }
        }
    }

    /// Remove `id` from `hasPart`, dropping the property once it is empty
    pub fn remove_part(&mut self, id: &str) -> bool {
        self.remove_reference_from(HAS_PART, id)
    }

    /// Remove `id` from `key`, dropping the property once it is empty
    pub fn remove_reference_from(&mut self, key: &str, id: &str) -> bool {
        let removed = match self.properties.get_mut(key) {
            Some(value) => value.remove_reference(id),
            None => false,
        };
        if removed && self.properties.get(key).is_some_and(PropertyValue::is_empty) {
            self.properties.shift_remove(key);
        }
        removed
    }

    /// Every id referenced from any property
    pub fn referenced_ids(&self) -> Vec<String> {
        self.properties
            .values()
            .flat_map(PropertyValue::referenced_ids)
            .collect()
    }

    /// Property keys beyond identity, type and name
    pub fn payload_keys(&self) -> impl Iterator<Item = &String> {
        self.properties
            .keys()
            .filter(|k| k.as_str() != NAME && !k.starts_with('@'))
    }

    /// True when nothing beyond identity, type and name is left
    pub fn is_bare(&self) -> bool {
        self.payload_keys().next().is_none()
    }

    pub fn from_json(value: &Value) -> Result<Self, SyncError> {
        let obj = value.as_object().ok_or_else(|| {
            SyncError::InvalidStructure("graph entity is not a JSON object".to_string())
        })?;
        let id = obj
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::InvalidStructure(format!("entity without @id: {}", value)))?
            .to_string();
        let types = match obj.get("@type") {
            Some(Value::String(t)) => vec![t.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if types.is_empty() {
            return Err(SyncError::InvalidStructure(format!(
                "entity '{}' has no @type",
                id
            )));
        }
        let properties = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "@id" && k.as_str() != "@type")
            .map(|(k, v)| (k.clone(), PropertyValue::from_json(v)))
            .collect();
        Ok(Self {
            id,
            types,
            properties,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("@id".to_string(), Value::String(self.id.clone()));
        let types = if self.types.len() == 1 {
            Value::String(self.types[0].clone())
        } else {
            Value::Array(self.types.iter().cloned().map(Value::String).collect())
        };
        obj.insert("@type".to_string(), types);
        for (key, value) in &self.properties {
            obj.insert(key.clone(), value.to_json());
        }
        Value::Object(obj)
    }
}

/// The `@context` of a document: base context(s) plus a term map
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    pub base: Vec<Value>,
    pub terms: IndexMap<String, Value>,
}

impl Context {
    pub fn new(base_url: &str) -> Self {
        Self {
            base: vec![Value::String(base_url.to_string())],
            terms: IndexMap::new(),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        let mut context = Context::default();
        match value {
            Value::Object(obj) => context.absorb_terms(obj),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(obj) => context.absorb_terms(obj),
                        other => context.base.push(other.clone()),
                    }
                }
            }
            Value::Null => {}
            other => context.base.push(other.clone()),
        }
        context
    }

    fn absorb_terms(&mut self, obj: &Map<String, Value>) {
        for (k, v) in obj {
            self.terms.insert(k.clone(), v.clone());
        }
    }

    pub fn to_json(&self) -> Value {
        if self.terms.is_empty() {
            return match self.base.len() {
                1 => self.base[0].clone(),
                _ => Value::Array(self.base.clone()),
            };
        }
        let terms: Map<String, Value> = self
            .terms
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if self.base.is_empty() {
            return Value::Object(terms);
        }
        let mut items = self.base.clone();
        items.push(Value::Object(terms));
        Value::Array(items)
    }

    /// URI a term is mapped to (plain string or `{"@id": ...}` form)
    pub fn term_uri(&self, term: &str) -> Option<&str> {
        match self.terms.get(term)? {
            Value::String(uri) => Some(uri),
            Value::Object(obj) => obj.get("@id").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn has_term(&self, term: &str) -> bool {
        self.terms.contains_key(term)
    }

    pub fn set_term(&mut self, term: impl Into<String>, uri: impl Into<String>) {
        self.terms.insert(term.into(), Value::String(uri.into()));
    }

    pub fn remove_term(&mut self, term: &str) -> Option<Value> {
        self.terms.shift_remove(term)
    }
}

/// A whole RO-Crate: context, root entity and all other entities
///
/// The root is held apart from the other entities, so a document always
/// has one. Serialization writes the descriptor first, then the root, then
/// everything else in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDocument {
    pub context: Context,
    root: GraphEntity,
    entities: IndexMap<String, GraphEntity>,
}

impl GraphDocument {
    /// Empty crate: descriptor plus a root Dataset
    pub fn new(context_url: &str) -> Self {
        let mut descriptor = GraphEntity::new(METADATA_DESCRIPTOR_ID, "CreativeWork");
        descriptor.set("about", PropertyValue::reference(ROOT_ENTITY_ID));
        descriptor.set(CONFORMS_TO, PropertyValue::reference(ROCRATE_PROFILE));

        let mut entities = IndexMap::new();
        entities.insert(descriptor.id.clone(), descriptor);

        Self {
            context: Context::new(context_url),
            root: GraphEntity::new(ROOT_ENTITY_ID, DATASET_TYPE),
            entities,
        }
    }

    /// Build a document from JSON-LD
    ///
    /// Expects a well-formed crate; the import pre-check reports the same
    /// problems as issues instead of failing on the first one.
    pub fn from_json(value: &Value) -> Result<Self, SyncError> {
        let graph = value
            .get("@graph")
            .and_then(Value::as_array)
            .ok_or_else(|| SyncError::InvalidStructure("missing @graph array".to_string()))?;

        let mut root = None;
        let mut entities = IndexMap::new();
        for item in graph {
            let entity = GraphEntity::from_json(item)?;
            if entity.id == ROOT_ENTITY_ID {
                if root.is_some() {
                    return Err(SyncError::InvalidStructure(format!(
                        "duplicate @id: {}",
                        entity.id
                    )));
                }
                root = Some(entity);
            } else if entities.contains_key(&entity.id) {
                return Err(SyncError::InvalidStructure(format!(
                    "duplicate @id: {}",
                    entity.id
                )));
            } else {
                entities.insert(entity.id.clone(), entity);
            }
        }

        Ok(Self {
            context: value
                .get("@context")
                .map(Context::from_json)
                .unwrap_or_default(),
            root: root.ok_or(SyncError::MissingRootEntity)?,
            entities,
        })
    }

    pub fn parse(text: &str) -> Result<Self, SyncError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("@context".to_string(), self.context.to_json());
        obj.insert(
            "@graph".to_string(),
            Value::Array(self.entities().map(GraphEntity::to_json).collect()),
        );
        Value::Object(obj)
    }

    pub fn to_json_string(&self, pretty: bool) -> Result<String, SyncError> {
        let value = self.to_json();
        let s = if pretty {
            serde_json::to_string_pretty(&value)?
        } else {
            serde_json::to_string(&value)?
        };
        Ok(s)
    }

    pub fn root(&self) -> &GraphEntity {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut GraphEntity {
        &mut self.root
    }

    pub fn get(&self, id: &str) -> Option<&GraphEntity> {
        if id == ROOT_ENTITY_ID {
            Some(&self.root)
        } else {
            self.entities.get(id)
        }
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut GraphEntity> {
        if id == ROOT_ENTITY_ID {
            Some(&mut self.root)
        } else {
            self.entities.get_mut(id)
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        id == ROOT_ENTITY_ID || self.entities.contains_key(id)
    }

    /// Insert or replace an entity, returning the replaced one
    pub fn insert(&mut self, entity: GraphEntity) -> Option<GraphEntity> {
        if entity.id == ROOT_ENTITY_ID {
            return Some(std::mem::replace(&mut self.root, entity));
        }
        self.entities.insert(entity.id.clone(), entity)
    }

    /// Remove an entity (never the root); references to it are untouched
    pub fn remove(&mut self, id: &str) -> Option<GraphEntity> {
        self.entities.shift_remove(id)
    }

    /// All entities in serialization order
    pub fn entities(&self) -> impl Iterator<Item = &GraphEntity> {
        let descriptor = self.entities.get(METADATA_DESCRIPTOR_ID);
        descriptor
            .into_iter()
            .chain(std::iter::once(&self.root))
            .chain(
                self.entities
                    .values()
                    .filter(|e| e.id != METADATA_DESCRIPTOR_ID),
            )
    }

    pub fn ids(&self) -> Vec<String> {
        self.entities().map(|e| e.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Ids of the entities that reference `id` from any property
    pub fn referrers_of(&self, id: &str) -> Vec<String> {
        self.entities()
            .filter(|e| e.referenced_ids().iter().any(|r| r == id))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Strip every reference to `id` from every entity
    pub fn detach(&mut self, id: &str) {
        let keys: Vec<(String, String)> = self
            .entities()
            .flat_map(|e| {
                e.properties
                    .iter()
                    .filter(|(_, v)| v.referenced_ids().iter().any(|r| r == id))
                    .map(|(k, _)| (e.id.clone(), k.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (entity_id, key) in keys {
            if let Some(entity) = self.get_mut(&entity_id) {
                entity.remove_reference_from(&key, id);
            }
        }
    }

    /// Child id -> parent id over `hasPart` of the root and every Dataset
    pub fn parent_map(&self) -> HashMap<String, String> {
        let mut parents = HashMap::new();
        for entity in self.entities().filter(|e| e.id == ROOT_ENTITY_ID || e.is_dataset()) {
            for child in entity.has_part() {
                parents
                    .entry(child.to_string())
                    .or_insert_with(|| entity.id.clone());
            }
        }
        parents
    }

    /// Rename entities and every reference to them at once
    ///
    /// A rename whose target is already taken by an entity that is not
    /// itself renamed away is skipped. Returns the renames applied.
    pub fn rewrite_ids(&mut self, map: &HashMap<String, String>) -> HashMap<String, String> {
        let moving: HashSet<&String> = map.keys().collect();
        let applied: HashMap<String, String> = map
            .iter()
            .filter(|(old, new)| {
                old.as_str() != ROOT_ENTITY_ID
                    && self.entities.contains_key(old.as_str())
                    && (!self.contains(new) || moving.contains(new))
            })
            .map(|(old, new)| (old.clone(), new.clone()))
            .collect();
        if applied.is_empty() {
            return applied;
        }

        let entities = std::mem::take(&mut self.entities);
        for (id, mut entity) in entities {
            if let Some(new_id) = applied.get(&id) {
                entity.id = new_id.clone();
            }
            self.entities.insert(entity.id.clone(), entity);
        }
        self.redirect_references(&applied);
        applied
    }

    /// Point references at other ids; entities themselves keep their ids
    pub fn redirect_references(&mut self, map: &HashMap<String, String>) {
        for value in self.root.properties.values_mut() {
            value.rewrite_references(map);
        }
        for entity in self.entities.values_mut() {
            for value in entity.properties.values_mut() {
                value.rewrite_references(map);
            }
        }
    }
}
