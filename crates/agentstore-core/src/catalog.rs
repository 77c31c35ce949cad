//! Schema catalog - declared modules, entities, relationships, and RBAC
//! specs, keyed by fully qualified names (`Module/Name`).
//!
//! The catalog is populated once at schema load and is read-only during
//! request processing; it is shared behind an `Arc` and needs no locking
//! after `CatalogBuilder::build` completes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Reserved column: canonical path identity, primary key of every row.
pub const PATH_ATTR: &str = "__path__";
/// Reserved column: isolation domain of the row.
pub const TENANT_ATTR: &str = "__tenant__";
/// Reserved column: soft-delete flag, default false.
pub const DELETED_ATTR: &str = "__is_deleted__";
/// Reserved column: parent path, present on contained children.
pub const PARENT_ATTR: &str = "__parent__";

/// Separator between module and name in a fully qualified name.
pub const FQ_SEP: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    String,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Boolean,
    DateTime,
    Uuid,
    Json,
    Enum,
}

impl AttrType {
    /// Whether values of this type can feed the full-text-search index.
    pub fn is_text(self) -> bool {
        matches!(self, Self::String | Self::Enum)
    }
}

/// One declared attribute of an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeMeta {
    pub name: String,
    pub ty: AttrType,
    pub nullable: bool,
    /// Declared `@id`: its value becomes the path identifier on insert.
    pub is_id: bool,
    pub indexed: bool,
    pub unique: bool,
    /// Eligible for semantic lookup through the vector index.
    pub full_text_search: bool,
    /// Returned only on write, stripped from every read result.
    pub write_only: bool,
    pub enum_values: Vec<String>,
}

impl AttributeMeta {
    pub fn new(name: impl Into<String>, ty: AttrType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            is_id: false,
            indexed: false,
            unique: false,
            full_text_search: false,
            write_only: false,
            enum_values: Vec::new(),
        }
    }

    pub fn id(mut self) -> Self {
        self.is_id = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.full_text_search = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn with_enum_values(mut self, values: Vec<String>) -> Self {
        self.ty = AttrType::Enum;
        self.enum_values = values;
        self
    }
}

/// Embedding parameters declared on an entity. Unset fields fall back to
/// the environment defaults of the embedding provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub dimension: Option<usize>,
}

/// A declared entity: named record type with attributes, owned by a module.
///
/// Created during schema load; immutable afterwards; destroyed only by a
/// full-catalog flush.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub module: String,
    pub name: String,
    pub attributes: Vec<AttributeMeta>,
    /// `None` disables semantic lookup. `Some(["*"])` means all text
    /// attributes are eligible.
    pub fts_attributes: Option<Vec<String>>,
    pub embedding: Option<EmbeddingConfig>,
}

impl EntityMeta {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            attributes: Vec::new(),
            fts_attributes: None,
            embedding: None,
        }
    }

    pub fn with_attribute(mut self, attr: AttributeMeta) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn with_fts(mut self, attrs: Vec<String>) -> Self {
        self.fts_attributes = Some(attrs);
        self
    }

    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = Some(config);
        self
    }

    pub fn fq_name(&self) -> String {
        format!("{}{}{}", self.module, FQ_SEP, self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeMeta> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// The declared `@id` attribute, if any.
    pub fn id_attribute(&self) -> Option<&AttributeMeta> {
        self.attributes.iter().find(|a| a.is_id)
    }

    pub fn write_only_attributes(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.write_only)
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Attribute names feeding the vector index, with `*` resolved to all
    /// text attributes that are not write-only.
    pub fn fts_columns(&self) -> Vec<String> {
        match &self.fts_attributes {
            None => Vec::new(),
            Some(attrs) if attrs.iter().any(|a| a == "*") => self
                .attributes
                .iter()
                .filter(|a| a.ty.is_text() && !a.write_only)
                .map(|a| a.name.clone())
                .collect(),
            Some(attrs) => attrs.clone(),
        }
    }

    pub fn has_fts(&self) -> bool {
        !self.fts_columns().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// Strictly hierarchical parent/child; the child row's path is prefixed
    /// by its parent's path.
    Contains,
    /// Two pointer columns, one on each endpoint table, holding the
    /// counterpart's path.
    OneToOne,
    /// Many-to-many, materialized as a join table with one row per
    /// connection.
    Between,
}

/// A declared relationship between two entity endpoints.
///
/// For `Contains`, `from` is the parent and `to` the child. For `Between`,
/// the link-table endpoint columns are named by `from_alias`/`to_alias`
/// (`a1`/`a2` unless the declaration overrides them).
#[derive(Debug, Clone)]
pub struct RelationshipMeta {
    pub module: String,
    pub name: String,
    pub kind: RelationshipKind,
    pub from: String,
    pub to: String,
    pub from_alias: String,
    pub to_alias: String,
}

impl RelationshipMeta {
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        kind: RelationshipKind,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            kind,
            from: from.into(),
            to: to.into(),
            from_alias: "a1".to_string(),
            to_alias: "a2".to_string(),
        }
    }

    pub fn with_aliases(mut self, from_alias: impl Into<String>, to_alias: impl Into<String>) -> Self {
        self.from_alias = from_alias.into();
        self.to_alias = to_alias.into();
        self
    }

    pub fn fq_name(&self) -> String {
        format!("{}{}{}", self.module, FQ_SEP, self.name)
    }

    /// Column holding the counterpart path on each endpoint of a
    /// one-to-one relationship.
    pub fn pointer_column(&self) -> String {
        sanitize_identifier(&self.name)
    }

    /// The other endpoint, given one of them.
    pub fn other_endpoint(&self, entity_fq: &str) -> Option<&str> {
        if self.from == entity_fq {
            Some(self.to.as_str())
        } else if self.to == entity_fq {
            Some(self.from.as_str())
        } else {
            None
        }
    }

    pub fn involves(&self, entity_fq: &str) -> bool {
        self.from == entity_fq || self.to == entity_fq
    }
}

/// Per-operation grant flags used by owners rows and RBAC specs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrudFlags {
    pub c: bool,
    pub r: bool,
    pub u: bool,
    pub d: bool,
}

impl CrudFlags {
    pub fn all() -> Self {
        Self {
            c: true,
            r: true,
            u: true,
            d: true,
        }
    }

    pub fn read_only() -> Self {
        Self {
            r: true,
            ..Self::default()
        }
    }
}

/// Declared role-based grant for an entity (or module wildcard).
#[derive(Debug, Clone)]
pub struct RbacSpec {
    pub roles: Vec<String>,
    pub allow: CrudFlags,
}

/// Lowercase an identifier and replace every separator character the SQL
/// layer cannot carry.
pub fn sanitize_identifier(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == '/' || c == '$' || c == '.' || c == '-' { '_' } else { c })
        .collect()
}

/// The declared schema: entities, relationships, and RBAC specs.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    entities: HashMap<String, EntityMeta>,
    relationships: HashMap<String, RelationshipMeta>,
    rbac: HashMap<String, Vec<RbacSpec>>,
    modules: BTreeSet<String>,
}

impl SchemaCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn lookup_entity(&self, fq: &str) -> Option<&EntityMeta> {
        self.entities.get(fq)
    }

    pub fn entity(&self, fq: &str) -> Result<&EntityMeta> {
        self.lookup_entity(fq)
            .ok_or_else(|| StoreError::NotFound(format!("entity {fq}")))
    }

    pub fn relationship(&self, fq: &str) -> Option<&RelationshipMeta> {
        self.relationships.get(fq)
    }

    pub fn relationships_for(&self, entity_fq: &str) -> Vec<&RelationshipMeta> {
        let mut rels: Vec<_> = self
            .relationships
            .values()
            .filter(|r| r.involves(entity_fq))
            .collect();
        rels.sort_by(|a, b| a.fq_name().cmp(&b.fq_name()));
        rels
    }

    pub fn one_to_one_relationships_for(&self, entity_fq: &str) -> Vec<&RelationshipMeta> {
        self.relationships_for(entity_fq)
            .into_iter()
            .filter(|r| r.kind == RelationshipKind::OneToOne)
            .collect()
    }

    /// Whether `fq` names a between (many-to-many) relationship. Between
    /// relationships are addressable like entities: they own a link table
    /// and accept instances whose attributes are the endpoint paths.
    pub fn is_between(&self, fq: &str) -> bool {
        self.relationships
            .get(fq)
            .map(|r| r.kind == RelationshipKind::Between)
            .unwrap_or(false)
    }

    pub fn rbac_rules_for(&self, entity_fq: &str) -> &[RbacSpec] {
        self.rbac.get(entity_fq).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityMeta> {
        self.entities.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipMeta> {
        self.relationships.values()
    }

    /// Table name for `Module/Entity`: lowercased `module_entity` with
    /// separator characters sanitized.
    pub fn table_reference(&self, module: &str, entity: &str) -> String {
        format!(
            "{}_{}",
            sanitize_identifier(module),
            sanitize_identifier(entity)
        )
    }

    /// Table name for a fully qualified entity or relationship name.
    pub fn table_for_fq(&self, fq: &str) -> Result<String> {
        let (module, name) = split_fq(fq)?;
        Ok(self.table_reference(module, name))
    }

    /// Column reference for an attribute, optionally qualified and quoted.
    pub fn column_reference(&self, attr: &str, table_ref: &str, quoted: bool) -> String {
        let col = sanitize_identifier(attr);
        if table_ref.is_empty() {
            if quoted {
                format!("\"{col}\"")
            } else {
                col
            }
        } else if quoted {
            format!("\"{table_ref}\".\"{col}\"")
        } else {
            format!("{table_ref}.{col}")
        }
    }
}

/// Owners table parallel to an entity table.
pub fn owners_table(table_ref: &str) -> String {
    format!("{table_ref}_owners")
}

/// Relational vector table parallel to an entity table.
pub fn vector_table(table_ref: &str) -> String {
    format!("{table_ref}_vec")
}

/// Split `Module/Name` into its parts.
pub fn split_fq(fq: &str) -> Result<(&str, &str)> {
    fq.split_once(FQ_SEP)
        .ok_or_else(|| StoreError::InvalidInput(format!("not a fully qualified name: {fq}")))
}

/// Validating builder for the catalog. Registration order does not matter;
/// endpoint references are checked at `build`.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entities: Vec<EntityMeta>,
    relationships: Vec<RelationshipMeta>,
    rbac: Vec<(String, RbacSpec)>,
}

impl CatalogBuilder {
    pub fn entity(mut self, meta: EntityMeta) -> Self {
        self.entities.push(meta);
        self
    }

    pub fn relationship(mut self, meta: RelationshipMeta) -> Self {
        self.relationships.push(meta);
        self
    }

    pub fn rbac(mut self, entity_fq: impl Into<String>, spec: RbacSpec) -> Self {
        self.rbac.push((entity_fq.into(), spec));
        self
    }

    pub fn build(self) -> Result<Arc<SchemaCatalog>> {
        let mut catalog = SchemaCatalog::default();

        for meta in self.entities {
            validate_name(&meta.module)?;
            validate_name(&meta.name)?;
            let fq = meta.fq_name();
            catalog.modules.insert(meta.module.clone());
            if catalog.entities.insert(fq.clone(), meta).is_some() {
                return Err(StoreError::InvalidInput(format!(
                    "entity declared twice: {fq}"
                )));
            }
        }

        for rel in self.relationships {
            validate_name(&rel.module)?;
            validate_name(&rel.name)?;
            for endpoint in [&rel.from, &rel.to] {
                if !catalog.entities.contains_key(endpoint) {
                    return Err(StoreError::InvalidInput(format!(
                        "relationship {} references unknown entity {endpoint}",
                        rel.fq_name()
                    )));
                }
            }
            let fq = rel.fq_name();
            catalog.modules.insert(rel.module.clone());
            if catalog.relationships.insert(fq.clone(), rel).is_some() {
                return Err(StoreError::InvalidInput(format!(
                    "relationship declared twice: {fq}"
                )));
            }
        }

        for (fq, spec) in self.rbac {
            catalog.rbac.entry(fq).or_default().push(spec);
        }

        Ok(Arc::new(catalog))
    }
}

/// Module and entity names travel inside path strings; the path separator
/// and the module separator are reserved.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('$') {
        return Err(StoreError::InvalidInput(format!(
            "invalid module or entity name: {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> EntityMeta {
        EntityMeta::new("acme", "Person")
            .with_attribute(AttributeMeta::new("id", AttrType::Int).id())
            .with_attribute(AttributeMeta::new("name", AttrType::String))
            .with_attribute(AttributeMeta::new("secret", AttrType::String).write_only())
    }

    #[test]
    fn table_and_column_references() {
        let catalog = SchemaCatalog::builder().entity(person()).build().unwrap();
        assert_eq!(catalog.table_reference("acme", "Person"), "acme_person");
        assert_eq!(catalog.table_for_fq("acme/Person").unwrap(), "acme_person");
        assert_eq!(
            catalog.column_reference("Name", "acme_person", true),
            "\"acme_person\".\"name\""
        );
        assert_eq!(owners_table("acme_person"), "acme_person_owners");
        assert_eq!(vector_table("acme_person"), "acme_person_vec");
    }

    #[test]
    fn relationship_endpoints_are_validated() {
        let err = SchemaCatalog::builder()
            .entity(person())
            .relationship(RelationshipMeta::new(
                "acme",
                "WorksAt",
                RelationshipKind::Between,
                "acme/Person",
                "acme/Company",
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn between_lookup_and_aliases() {
        let catalog = SchemaCatalog::builder()
            .entity(person())
            .entity(EntityMeta::new("acme", "Company")
                .with_attribute(AttributeMeta::new("id", AttrType::Int).id()))
            .relationship(RelationshipMeta::new(
                "acme",
                "EmploymentOf",
                RelationshipKind::Between,
                "acme/Person",
                "acme/Company",
            ))
            .build()
            .unwrap();

        assert!(catalog.is_between("acme/EmploymentOf"));
        assert!(!catalog.is_between("acme/Person"));
        let rel = catalog.relationship("acme/EmploymentOf").unwrap();
        assert_eq!(rel.from_alias, "a1");
        assert_eq!(rel.to_alias, "a2");
        assert_eq!(rel.other_endpoint("acme/Person"), Some("acme/Company"));
    }

    #[test]
    fn fts_star_resolves_to_text_attributes() {
        let meta = person().with_fts(vec!["*".to_string()]);
        // write-only attributes never feed the index
        assert_eq!(meta.fts_columns(), vec!["name".to_string()]);
    }

    #[test]
    fn reserved_characters_rejected() {
        let err = SchemaCatalog::builder()
            .entity(EntityMeta::new("ac/me", "P"))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }
}
