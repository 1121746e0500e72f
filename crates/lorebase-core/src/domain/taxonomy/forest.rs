//! Concept forest
//!
//! Arena of concept nodes keyed by uid. Parent/child structure is a list of
//! child uids per node plus the ordered list of roots. The forest itself is
//! not synchronized; `Taxonomy` wraps it in a reader-writer lock.

use std::collections::HashMap;

use super::concept::Concept;

#[derive(Debug, Clone)]
struct ConceptNode {
    concept: Concept,
    children: Vec<String>,
}

/// Forest of concept trees
#[derive(Debug, Clone, Default)]
pub struct ConceptForest {
    nodes: HashMap<String, ConceptNode>,
    roots: Vec<String>,
}

impl ConceptForest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.nodes.contains_key(uid)
    }

    /// Register a top-level concept; returns false if the uid is taken
    pub fn insert_top(&mut self, concept: Concept) -> bool {
        if self.nodes.contains_key(&concept.uid) {
            return false;
        }
        self.roots.push(concept.uid.clone());
        self.nodes.insert(
            concept.uid.clone(),
            ConceptNode {
                concept,
                children: Vec::new(),
            },
        );
        true
    }

    /// Append a child under a located parent
    ///
    /// Returns false when the parent is missing or the uid is taken, so a
    /// concept can never become its own descendant.
    pub fn insert_child(&mut self, parent: &str, concept: Concept) -> bool {
        if self.nodes.contains_key(&concept.uid) || !self.nodes.contains_key(parent) {
            return false;
        }
        let uid = concept.uid.clone();
        self.nodes.insert(
            uid.clone(),
            ConceptNode {
                concept,
                children: Vec::new(),
            },
        );
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(uid);
        }
        true
    }

    pub fn get(&self, uid: &str) -> Option<&Concept> {
        self.nodes.get(uid).map(|n| &n.concept)
    }

    pub fn get_mut(&mut self, uid: &str) -> Option<&mut Concept> {
        self.nodes.get_mut(uid).map(|n| &mut n.concept)
    }

    /// Every concept, depth-first pre-order, roots in registration order
    pub fn preorder(&self) -> Vec<&Concept> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&str> = self.roots.iter().rev().map(String::as_str).collect();
        while let Some(uid) = stack.pop() {
            if let Some(node) = self.nodes.get(uid) {
                out.push(&node.concept);
                stack.extend(node.children.iter().rev().map(String::as_str));
            }
        }
        out
    }

    /// First concept with the given name in pre-order
    pub fn find_by_name(&self, name: &str) -> Option<&Concept> {
        self.preorder().into_iter().find(|c| c.name == name)
    }

    /// Whether another concept already uses `name`
    pub fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        self.nodes
            .values()
            .any(|n| n.concept.name == name && Some(n.concept.uid.as_str()) != except)
    }

    pub fn top_concepts(&self) -> Vec<&Concept> {
        self.roots.iter().filter_map(|uid| self.get(uid)).collect()
    }

    pub fn children(&self, uid: &str) -> Option<Vec<&Concept>> {
        let node = self.nodes.get(uid)?;
        Some(node.children.iter().filter_map(|c| self.get(c)).collect())
    }

    /// The concept and all its descendants, pre-order
    pub fn subtree(&self, uid: &str) -> Vec<&Concept> {
        let mut out = Vec::new();
        let mut stack = vec![uid];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                out.push(&node.concept);
                stack.extend(node.children.iter().rev().map(String::as_str));
            }
        }
        out
    }

    /// Whether `uid` is a strict descendant of `ancestor`
    pub fn had_child(&self, ancestor: &str, uid: &str) -> bool {
        ancestor != uid && self.subtree(ancestor).iter().any(|c| c.uid == uid)
    }

    /// Whether the concept or any descendant references the attribute
    pub fn had_attribute(&self, uid: &str, attribute: &str) -> bool {
        let Some(node) = self.nodes.get(uid) else {
            return false;
        };
        if node.concept.attributes.iter().any(|a| a == attribute) {
            return true;
        }
        node.children.iter().any(|c| self.had_attribute(c, attribute))
    }

    /// Top-level ancestor of a concept (itself if top-level)
    pub fn root_of(&self, uid: &str) -> Option<&Concept> {
        let mut current = self.get(uid)?;
        // Depth is bounded by the node count
        for _ in 0..self.nodes.len() {
            if current.parent.is_empty() {
                return Some(current);
            }
            current = self.get(&current.parent)?;
        }
        None
    }

    /// Detach a concept and its whole subtree, returning the removed
    /// concepts in pre-order
    pub fn remove(&mut self, uid: &str) -> Vec<Concept> {
        let Some(parent) = self.get(uid).map(|c| c.parent.clone()) else {
            return Vec::new();
        };

        if parent.is_empty() {
            self.roots.retain(|r| r != uid);
        } else if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|c| c != uid);
        }

        let doomed: Vec<String> = self.subtree(uid).iter().map(|c| c.uid.clone()).collect();
        doomed
            .iter()
            .filter_map(|u| self.nodes.remove(u).map(|n| n.concept))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::taxonomy::ConceptType;

    fn concept(name: &str) -> Concept {
        Concept::new(name, ConceptType::Other)
    }

    fn child(name: &str, parent: &Concept) -> Concept {
        let mut c = concept(name);
        c.parent = parent.uid.clone();
        c
    }

    /// Person ─┬─ Scholar ── Poet
    ///         └─ Soldier
    /// Place
    fn sample() -> (ConceptForest, [Concept; 5]) {
        let person = concept("Person").with_table("entities");
        let place = concept("Place").with_table("places");
        let scholar = child("Scholar", &person).with_attributes(vec!["attr-birth".into()]);
        let soldier = child("Soldier", &person);
        let poet = child("Poet", &scholar).with_attributes(vec!["attr-pen-name".into()]);

        let mut forest = ConceptForest::new();
        assert!(forest.insert_top(person.clone()));
        assert!(forest.insert_top(place.clone()));
        assert!(forest.insert_child(&person.uid, scholar.clone()));
        assert!(forest.insert_child(&person.uid, soldier.clone()));
        assert!(forest.insert_child(&scholar.uid, poet.clone()));

        (forest, [person, place, scholar, soldier, poet])
    }

    #[test]
    fn test_preorder() {
        let (forest, _) = sample();
        let names: Vec<&str> = forest.preorder().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Person", "Scholar", "Poet", "Soldier", "Place"]);
    }

    #[test]
    fn test_insert_rejects_duplicates_and_orphans() {
        let (mut forest, [person, ..]) = sample();
        assert!(!forest.insert_top(person.clone()));
        assert!(!forest.insert_child("missing", concept("Orphan")));
        assert_eq!(forest.len(), 5);
    }

    #[test]
    fn test_had_child() {
        let (forest, [person, place, scholar, _, poet]) = sample();
        assert!(forest.had_child(&person.uid, &poet.uid));
        assert!(forest.had_child(&scholar.uid, &poet.uid));
        assert!(!forest.had_child(&place.uid, &poet.uid));
        assert!(!forest.had_child(&poet.uid, &poet.uid));
        assert!(!forest.had_child(&poet.uid, &person.uid));
    }

    #[test]
    fn test_had_attribute_recurses_into_children() {
        let (forest, [person, place, scholar, soldier, _]) = sample();
        assert!(forest.had_attribute(&person.uid, "attr-pen-name"));
        assert!(forest.had_attribute(&scholar.uid, "attr-birth"));
        assert!(!forest.had_attribute(&soldier.uid, "attr-birth"));
        assert!(!forest.had_attribute(&place.uid, "attr-birth"));
    }

    #[test]
    fn test_root_of() {
        let (forest, [person, place, _, _, poet]) = sample();
        assert_eq!(forest.root_of(&poet.uid).unwrap().uid, person.uid);
        assert_eq!(forest.root_of(&place.uid).unwrap().uid, place.uid);
        assert!(forest.root_of("missing").is_none());
    }

    #[test]
    fn test_remove_subtree() {
        let (mut forest, [person, place, scholar, soldier, poet]) = sample();

        let removed = forest.remove(&scholar.uid);
        let names: Vec<&str> = removed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Scholar", "Poet"]);
        assert!(!forest.contains(&poet.uid));

        let children: Vec<&str> = forest
            .children(&person.uid)
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(children, vec!["Soldier"]);

        forest.remove(&person.uid);
        assert!(!forest.contains(&soldier.uid));
        let tops: Vec<&str> = forest.top_concepts().iter().map(|c| c.uid.as_str()).collect();
        assert_eq!(tops, vec![place.uid.as_str()]);

        assert!(forest.remove("missing").is_empty());
    }

    #[test]
    fn test_find_by_name_and_name_taken() {
        let (forest, [_, _, scholar, ..]) = sample();
        assert_eq!(forest.find_by_name("Scholar").unwrap().uid, scholar.uid);
        assert!(forest.find_by_name("Nobody").is_none());
        assert!(forest.name_taken("Scholar", None));
        assert!(!forest.name_taken("Scholar", Some(&scholar.uid)));
    }
}
