//! Record → graph mapping.
//!
//! | Record            | Nodes                     | Edges                          |
//! |-------------------|---------------------------|--------------------------------|
//! | paper             | `Paper`                   |                                |
//! | paper author      | `Author`                  | paper `AUTHORED_BY` author     |
//! | paper MeSH term   | `MeshTerm`                | paper `HAS_MESH_TERM` term     |
//! | paper reference   |                           | paper `CITES` paper            |
//! | gene              | `Gene`                    | gene `MENTIONED_IN` paper      |
//!
//! Edges to papers that never made it into the graph are dropped by the
//! store, so a `CITES` edge only exists when both ends are known.

use std::collections::BTreeMap;

use biograph_common::{Gene, Paper};
use biograph_db::schema::node_id;
use biograph_db::{EntityType, GraphEntity, GraphRelationship};

pub const AUTHORED_BY: &str = "AUTHORED_BY";
pub const HAS_MESH_TERM: &str = "HAS_MESH_TERM";
pub const CITES: &str = "CITES";
pub const MENTIONED_IN: &str = "MENTIONED_IN";

/// Nodes and edges ready to merge. Nodes are unique by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphBatch {
    pub entities: Vec<GraphEntity>,
    pub relationships: Vec<GraphRelationship>,
}

impl GraphBatch {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.entities.iter().filter(|e| e.entity_type == entity_type).count()
    }
}

pub fn build_batch(papers: &[Paper], genes: &[Gene]) -> GraphBatch {
    let mut entities: BTreeMap<String, GraphEntity> = BTreeMap::new();
    let mut relationships: BTreeMap<(String, String, String), GraphRelationship> = BTreeMap::new();
    let mut add_edge = |rel: GraphRelationship| {
        relationships.entry(rel.identity()).or_insert(rel);
    };

    for paper in papers {
        let paper_node = paper_entity(paper);
        let paper_id = paper_node.id();
        entities.insert(paper_id.clone(), paper_node);

        for author in &paper.authors {
            let key = author.normalised_name();
            if key.is_empty() {
                continue;
            }
            let mut node = GraphEntity::new(EntityType::Author, key).with_property("name", author.name.trim());
            if let Some(aff) = &author.affiliation {
                node = node.with_property("affiliation", aff.as_str());
            }
            add_edge(GraphRelationship::new(&paper_id, AUTHORED_BY, node.id()));
            // First affiliation seen wins so re-merging the same input is stable.
            entities.entry(node.id()).or_insert(node);
        }

        for term in &paper.mesh_terms {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let node = GraphEntity::new(EntityType::MeshTerm, term).with_property("term", term);
            add_edge(GraphRelationship::new(&paper_id, HAS_MESH_TERM, node.id()));
            entities.entry(node.id()).or_insert(node);
        }

        for cited in &paper.references {
            if cited != &paper.pmid {
                add_edge(GraphRelationship::new(&paper_id, CITES, node_id(EntityType::Paper, cited)));
            }
        }
    }

    for gene in genes {
        let node = gene_entity(gene);
        let gene_id = node.id();
        entities.insert(gene_id.clone(), node);
        for pmid in &gene.linked_pmids {
            add_edge(GraphRelationship::new(&gene_id, MENTIONED_IN, node_id(EntityType::Paper, pmid)));
        }
    }

    GraphBatch {
        entities: entities.into_values().collect(),
        relationships: relationships.into_values().collect(),
    }
}

fn paper_entity(paper: &Paper) -> GraphEntity {
    let mut node = GraphEntity::new(EntityType::Paper, &paper.pmid)
        .with_property("pmid", paper.pmid.as_str())
        .with_property("title", paper.title.as_str())
        .with_property("has_abstract", paper.abstract_text.is_some());
    if let Some(journal) = &paper.journal {
        node = node.with_property("journal", journal.as_str());
    }
    if let Some(date) = paper.publication_date {
        node = node.with_property("publication_date", date.to_string());
    }
    if let Some(doi) = &paper.doi {
        node = node.with_property("doi", doi.as_str());
    }
    node
}

fn gene_entity(gene: &Gene) -> GraphEntity {
    let mut node = GraphEntity::new(EntityType::Gene, &gene.gene_id)
        .with_property("gene_id", gene.gene_id.as_str())
        .with_property("symbol", gene.symbol.as_str());
    if let Some(desc) = &gene.description {
        node = node.with_property("description", desc.as_str());
    }
    if let Some(org) = &gene.organism {
        node = node.with_property("organism", org.as_str());
    }
    node
}
