//! Category Aggregate
//!
//! Categories form a fixed three level taxonomy: Category, Subcategory and
//! Sub-subcategory. Products point at the deepest category that applies to
//! them, so lookups by an upper level must expand to the whole subtree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;
use crate::domain::value_objects::{Slug, TenantId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CategoryLevel { Category = 1, Subcategory = 2, SubSubcategory = 3 }

impl CategoryLevel {
    pub fn child(self) -> Option<Self> {
        match self { Self::Category => Some(Self::Subcategory), Self::Subcategory => Some(Self::SubSubcategory), Self::SubSubcategory => None }
    }
}

impl TryFrom<u8> for CategoryLevel {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v { 1 => Ok(Self::Category), 2 => Ok(Self::Subcategory), 3 => Ok(Self::SubSubcategory), _ => Err(format!("invalid category level {v}")) }
    }
}

impl From<CategoryLevel> for u8 {
    fn from(l: CategoryLevel) -> Self { l as u8 }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: Slug,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub level: CategoryLevel,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    pub fn root(tenant_id: TenantId, name: impl Into<String>, slug: Slug) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), tenant_id, name: name.into(), slug, description: None, parent_id: None,
            level: CategoryLevel::Category, is_active: true, sort_order: 0, created_at: now, updated_at: now,
        }
    }

    /// A category one level below `parent`.
    pub fn child_of(parent: &Category, name: impl Into<String>, slug: Slug) -> Result<Self, CategoryError> {
        let level = parent.level.child().ok_or(CategoryError::TooDeep)?;
        let mut c = Self::root(parent.tenant_id.clone(), name, slug);
        c.parent_id = Some(parent.id);
        c.level = level;
        Ok(c)
    }

    pub fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CategoryError { TooDeep, CyclicParent, HasChildren }
impl std::error::Error for CategoryError {}
impl std::fmt::Display for CategoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooDeep => write!(f, "Categories are limited to three levels"),
            Self::CyclicParent => write!(f, "A category cannot be moved below itself"),
            Self::HasChildren => write!(f, "Category still has subcategories"),
        }
    }
}

/// Nested view of a category and everything below it.
#[derive(Clone, Debug, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

/// In-memory index over one tenant's categories.
#[derive(Clone, Debug, Default)]
pub struct CategoryTree {
    by_id: HashMap<Uuid, Category>,
    children: HashMap<Uuid, Vec<Uuid>>,
    roots: Vec<Uuid>,
}

impl CategoryTree {
    pub fn new(categories: Vec<Category>) -> Self {
        let mut tree = Self::default();
        for c in &categories {
            match c.parent_id {
                Some(p) => tree.children.entry(p).or_default().push(c.id),
                None => tree.roots.push(c.id),
            }
        }
        tree.by_id = categories.into_iter().map(|c| (c.id, c)).collect();
        let by_id = &tree.by_id;
        let order = |ids: &mut Vec<Uuid>| ids.sort_by(|a, b| {
            let (a, b) = (&by_id[a], &by_id[b]);
            a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name))
        });
        order(&mut tree.roots);
        for ids in tree.children.values_mut() { order(ids); }
        tree
    }

    pub fn get(&self, id: Uuid) -> Option<&Category> { self.by_id.get(&id) }

    pub fn find_by_slug(&self, slug: &str) -> Option<&Category> {
        self.by_id.values().find(|c| c.slug.as_str() == slug)
    }

    /// Resolves either a category id or a slug.
    pub fn resolve(&self, key: &str) -> Option<&Category> {
        Uuid::parse_str(key).ok().and_then(|id| self.get(id)).or_else(|| self.find_by_slug(key))
    }

    pub fn children(&self, id: Uuid) -> Vec<&Category> {
        self.children.get(&id).map(|ids| ids.iter().filter_map(|c| self.by_id.get(c)).collect()).unwrap_or_default()
    }

    pub fn has_children(&self, id: Uuid) -> bool { self.children.get(&id).is_some_and(|c| !c.is_empty()) }

    /// `id` plus every category below it, breadth first.
    pub fn descendants_inclusive(&self, id: Uuid) -> Vec<Uuid> {
        if !self.by_id.contains_key(&id) { return vec![]; }
        let mut seen = HashSet::from([id]);
        let mut out = vec![id];
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for child in self.children.get(&current).into_iter().flatten() {
                if seen.insert(*child) {
                    out.push(*child);
                    queue.push_back(*child);
                }
            }
        }
        out
    }

    /// Breadcrumb from the root down to `id`.
    pub fn path(&self, id: Uuid) -> Vec<&Category> {
        let mut path = vec![];
        let mut seen = HashSet::new();
        let mut cursor = self.by_id.get(&id);
        while let Some(c) = cursor {
            if !seen.insert(c.id) { break; }
            path.push(c);
            cursor = c.parent_id.and_then(|p| self.by_id.get(&p));
        }
        path.reverse();
        path
    }

    /// Top level category that `id` sits under.
    pub fn root_of(&self, id: Uuid) -> Option<&Category> { self.path(id).into_iter().next() }

    /// Whether `candidate` lies in the subtree rooted at `id`.
    pub fn is_within(&self, candidate: Uuid, id: Uuid) -> bool {
        self.path(candidate).iter().any(|c| c.id == id)
    }

    pub fn nested(&self) -> Vec<CategoryNode> {
        self.roots.iter().filter_map(|id| self.node(*id, 0)).collect()
    }

    fn node(&self, id: Uuid, depth: usize) -> Option<CategoryNode> {
        if depth > 3 { return None; }
        let category = self.by_id.get(&id)?.clone();
        let children = self.children.get(&id).into_iter().flatten().filter_map(|c| self.node(*c, depth + 1)).collect();
        Some(CategoryNode { category, children })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> { self.by_id.values() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId { TenantId::parse("acme").unwrap() }
    fn slug(s: &str) -> Slug { Slug::from_name(s).unwrap() }

    fn fixture() -> (CategoryTree, Category, Category, Category) {
        let clothing = Category::root(tenant(), "Clothing", slug("clothing"));
        let women = Category::child_of(&clothing, "Women", slug("women")).unwrap();
        let dresses = Category::child_of(&women, "Dresses", slug("dresses")).unwrap();
        let shoes = Category::root(tenant(), "Shoes", slug("shoes"));
        let tree = CategoryTree::new(vec![clothing.clone(), women.clone(), dresses.clone(), shoes]);
        (tree, clothing, women, dresses)
    }

    #[test]
    fn test_levels() {
        let (_, clothing, women, dresses) = fixture();
        assert_eq!(clothing.level, CategoryLevel::Category);
        assert_eq!(women.level, CategoryLevel::Subcategory);
        assert_eq!(dresses.level, CategoryLevel::SubSubcategory);
        assert_eq!(Category::child_of(&dresses, "Maxi", slug("maxi")), Err(CategoryError::TooDeep));
    }

    #[test]
    fn test_expansion_and_path() {
        let (tree, clothing, women, dresses) = fixture();
        assert_eq!(tree.descendants_inclusive(clothing.id), vec![clothing.id, women.id, dresses.id]);
        assert_eq!(tree.descendants_inclusive(dresses.id), vec![dresses.id]);
        assert!(tree.descendants_inclusive(Uuid::nil()).is_empty());
        let names: Vec<_> = tree.path(dresses.id).iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Clothing", "Women", "Dresses"]);
        assert_eq!(tree.root_of(dresses.id).unwrap().id, clothing.id);
        assert!(tree.is_within(dresses.id, women.id));
        assert!(!tree.is_within(women.id, dresses.id));
    }

    #[test]
    fn test_resolve_by_slug_or_id() {
        let (tree, _, women, _) = fixture();
        assert_eq!(tree.resolve("women").unwrap().id, women.id);
        assert_eq!(tree.resolve(&women.id.to_string()).unwrap().id, women.id);
        assert!(tree.resolve("hats").is_none());
    }

    #[test]
    fn test_nested_sorted_by_name() {
        let (tree, ..) = fixture();
        let nested = tree.nested();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].category.name, "Clothing");
        assert_eq!(nested[0].children[0].children[0].category.name, "Dresses");
    }
}
