//! Storefront search.
//!
//! Matching runs over the tenant's visible products in memory: every query
//! token is an escaped, case-insensitive regex that must hit at least one of
//! the searchable fields. Empty result sets get "did you mean" suggestions
//! drawn from the catalog vocabulary.

use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::domain::aggregates::{CategoryTree, Product};
use crate::domain::value_objects::TenantId;
use crate::error::{CommerceError, Result};
use crate::store::{Page, ProductFilter, Store};

const MAX_SUGGESTIONS: usize = 5;
const MAX_AUTOCOMPLETE: usize = 20;
const MAX_QUERY_CHARS: usize = 200;
/// Tokens past this many are ignored.
const MAX_TOKENS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder { #[default] Relevance, PriceAsc, PriceDesc, Newest, Name, Popular }

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub in_stock: Option<bool>,
    #[serde(default)]
    pub sort: SortOrder,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount { pub value: String, pub count: usize }

#[derive(Debug, Clone, Default, Serialize)]
pub struct Facets {
    pub brands: Vec<FacetCount>,
    pub colors: Vec<FacetCount>,
    pub sizes: Vec<FacetCount>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub data: Vec<Product>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub facets: Facets,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind { Product, Category }

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion { pub text: String, pub kind: SuggestionKind, pub slug: String }

#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn Store>,
}

impl SearchService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    pub async fn search(&self, tenant: &TenantId, params: &SearchParams) -> Result<SearchResults> {
        let products = self.store.find_products(tenant, &ProductFilter::storefront()).await?;
        let tree = CategoryTree::new(self.store.list_categories(tenant).await?);
        let results = search_products(&products, &tree, params)?;
        debug!(%tenant, q = params.q.as_deref().unwrap_or(""), total = results.total, "search");
        Ok(results)
    }

    pub async fn autocomplete(&self, tenant: &TenantId, q: &str, limit: Option<usize>) -> Result<Vec<Suggestion>> {
        check_query_length(q)?;
        let products = self.store.find_products(tenant, &ProductFilter::storefront()).await?;
        let categories = self.store.list_categories(tenant).await?;
        let limit = limit.unwrap_or(10).clamp(1, MAX_AUTOCOMPLETE);
        let mut seen = HashSet::new();
        let names = products.iter().map(|p| (p.name(), SuggestionKind::Product, p.slug().as_str()))
            .chain(categories.iter().filter(|c| c.is_active).map(|c| (c.name.as_str(), SuggestionKind::Category, c.slug.as_str())));
        Ok(names.filter(|(name, _, _)| completes(name, q))
            .filter(|(name, _, _)| seen.insert(name.to_lowercase()))
            .take(limit)
            .map(|(name, kind, slug)| Suggestion { text: name.to_string(), kind, slug: slug.to_string() })
            .collect())
    }
}

/// Filters, sorts and pages `products`, which must already be storefront-visible.
/// When nothing matches, suggestions are drawn from the same products and `tree`.
pub fn search_products(products: &[Product], tree: &CategoryTree, params: &SearchParams) -> Result<SearchResults> {
    let q = params.q.as_deref().unwrap_or("");
    check_query_length(q)?;
    let tokens = tokenize(q);
    let patterns = tokens.iter().map(|t| token_regex(t)).collect::<Result<Vec<_>>>()?;

    let categories = params.category.as_deref().filter(|c| !c.is_empty())
        .map(|key| tree.resolve(key).map(|c| tree.descendants_inclusive(c.id)).unwrap_or_default());

    let mut hits: Vec<(usize, &Product)> = products.iter()
        .filter(|p| categories.as_ref().map_or(true, |ids| p.category_id().is_some_and(|c| ids.contains(&c))))
        .filter(|p| matches_attributes(p, params))
        .filter(|p| patterns.iter().all(|re| text_fields(p).any(|f| re.is_match(f))))
        .map(|p| (patterns.iter().filter(|re| re.is_match(p.name())).count(), p))
        .collect();

    let facets = facets(hits.iter().map(|(_, p)| *p));
    sort(&mut hits, params.sort);

    let page = Page::new(params.page, params.per_page);
    let total = hits.len() as u64;
    let suggestions = if total == 0 && !tokens.is_empty() {
        did_you_mean(&tokens, &Vocabulary::build(products, tree))
    } else {
        vec![]
    };
    Ok(SearchResults {
        data: page.slice(hits).into_iter().map(|(_, p)| p.clone()).collect(),
        total,
        page: page.page,
        per_page: page.per_page,
        facets,
        suggestions,
    })
}

fn check_query_length(q: &str) -> Result<()> {
    if q.chars().count() > MAX_QUERY_CHARS {
        return Err(CommerceError::InvalidInput(format!("query must be at most {MAX_QUERY_CHARS} characters")));
    }
    Ok(())
}

fn tokenize(q: &str) -> Vec<String> {
    q.split_whitespace().take(MAX_TOKENS).map(str::to_lowercase).collect()
}

fn token_regex(token: &str) -> Result<Regex> {
    RegexBuilder::new(&regex::escape(token)).case_insensitive(true).build()
        .map_err(|e| CommerceError::InvalidInput(format!("invalid search term: {e}")))
}

fn text_fields(p: &Product) -> impl Iterator<Item = &str> {
    [p.name(), p.description()].into_iter()
        .chain(p.brand())
        .chain(p.tags().iter().map(String::as_str))
        .chain(p.variants().iter().filter_map(|v| v.color.as_deref()))
}

fn matches_attributes(p: &Product, params: &SearchParams) -> bool {
    let eq = |a: &str, b: &str| a.eq_ignore_ascii_case(b.trim());
    if let Some(brand) = params.brand.as_deref() {
        if !p.brand().is_some_and(|b| eq(b, brand)) { return false; }
    }
    if let Some(color) = params.color.as_deref() {
        if !p.variants().iter().any(|v| v.color.as_deref().is_some_and(|c| eq(c, color))) { return false; }
    }
    if let Some(size) = params.size.as_deref() {
        if !p.variants().iter().any(|v| v.size.as_deref().is_some_and(|s| eq(s, size))) { return false; }
    }
    let price = p.min_price().amount();
    if params.min_price.is_some_and(|min| price < min) { return false; }
    if params.max_price.is_some_and(|max| price > max) { return false; }
    if params.in_stock == Some(true) && p.total_stock() == 0 { return false; }
    true
}

fn sort(hits: &mut [(usize, &Product)], order: SortOrder) {
    match order {
        SortOrder::Relevance => hits.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| b.created_at().cmp(&a.created_at()))),
        SortOrder::PriceAsc => hits.sort_by(|(_, a), (_, b)| a.min_price().amount().cmp(&b.min_price().amount())),
        SortOrder::PriceDesc => hits.sort_by(|(_, a), (_, b)| b.min_price().amount().cmp(&a.min_price().amount())),
        SortOrder::Newest => hits.sort_by(|(_, a), (_, b)| b.created_at().cmp(&a.created_at())),
        SortOrder::Name => hits.sort_by(|(_, a), (_, b)| a.name().to_lowercase().cmp(&b.name().to_lowercase())),
        SortOrder::Popular => hits.sort_by(|(_, a), (_, b)| b.sales_count().cmp(&a.sales_count())),
    }
}

fn facets<'a>(products: impl Iterator<Item = &'a Product>) -> Facets {
    let mut brands = BTreeMap::<String, usize>::new();
    let mut colors = BTreeMap::<String, usize>::new();
    let mut sizes = BTreeMap::<String, usize>::new();
    let mut facets = Facets::default();
    for p in products {
        if let Some(b) = p.brand() { *brands.entry(b.to_string()).or_default() += 1; }
        // Counted once per product, not per variant.
        let own_colors: HashSet<&str> = p.variants().iter().filter_map(|v| v.color.as_deref()).collect();
        for c in own_colors { *colors.entry(c.to_string()).or_default() += 1; }
        let own_sizes: HashSet<&str> = p.variants().iter().filter_map(|v| v.size.as_deref()).collect();
        for s in own_sizes { *sizes.entry(s.to_string()).or_default() += 1; }
        let price = p.min_price().amount();
        facets.min_price = Some(facets.min_price.map_or(price, |m| m.min(price)));
        facets.max_price = Some(facets.max_price.map_or(price, |m| m.max(price)));
    }
    facets.brands = counts(brands);
    facets.colors = counts(colors);
    facets.sizes = counts(sizes);
    facets
}

fn counts(map: BTreeMap<String, usize>) -> Vec<FacetCount> {
    let mut out: Vec<FacetCount> = map.into_iter().map(|(value, count)| FacetCount { value, count }).collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    out
}

/// `q` is a prefix of the name or of one of its words.
fn completes(name: &str, q: &str) -> bool {
    let q = q.trim().to_lowercase();
    if q.is_empty() { return false; }
    let name = name.to_lowercase();
    name.starts_with(&q) || name.split(|c: char| !c.is_alphanumeric()).any(|w| w.starts_with(&q))
}

/// Words known to the catalog with their frequency.
#[derive(Debug, Default)]
pub struct Vocabulary { words: HashMap<String, usize> }

impl Vocabulary {
    pub fn build(products: &[Product], tree: &CategoryTree) -> Self {
        let mut vocab = Self::default();
        for p in products {
            vocab.add(p.name());
            if let Some(b) = p.brand() { vocab.add(b); }
            for t in p.tags() { vocab.add(t); }
        }
        for c in tree.iter() { vocab.add(&c.name); }
        vocab
    }

    fn add(&mut self, text: &str) {
        for w in text.split(|c: char| !c.is_alphanumeric()).filter(|w| w.chars().count() > 1) {
            *self.words.entry(w.to_lowercase()).or_default() += 1;
        }
    }

    fn contains(&self, word: &str) -> bool { self.words.contains_key(word) }

    /// Known words within the edit budget of `token`, closest and most frequent first.
    fn closest(&self, token: &str) -> Vec<&str> {
        let len = token.chars().count();
        let budget = (len / 3).clamp(1, 3);
        let mut candidates: Vec<(usize, usize, &str)> = self.words.iter()
            .filter(|(w, _)| w.chars().count().abs_diff(len) <= budget)
            .filter_map(|(w, freq)| {
                let d = levenshtein(token, w);
                (d > 0 && d <= budget).then_some((d, *freq, w.as_str()))
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)).then_with(|| a.2.cmp(b.2)));
        candidates.into_iter().map(|(_, _, w)| w).collect()
    }
}

/// Alternative queries with one misspelt token replaced.
pub fn did_you_mean(tokens: &[String], vocabulary: &Vocabulary) -> Vec<String> {
    let mut out = vec![];
    for (i, token) in tokens.iter().enumerate() {
        if vocabulary.contains(token) { continue; }
        for candidate in vocabulary.closest(token) {
            let mut query = tokens.to_vec();
            query[i] = candidate.to_string();
            let query = query.join(" ");
            if !out.contains(&query) { out.push(query); }
            if out.len() == MAX_SUGGESTIONS { return out; }
        }
    }
    out
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::tests::{details, variant};
    use crate::domain::aggregates::{Category, ProductDetails};
    use crate::domain::value_objects::{Money, Slug};

    fn tenant() -> TenantId { TenantId::parse("acme").unwrap() }

    fn product(d: ProductDetails, sales: u32) -> Product {
        let slug = Slug::from_name(&d.name).unwrap();
        let mut p = Product::create(tenant(), slug, d).unwrap();
        p.approve().unwrap();
        p.record_sale(sales);
        p
    }

    fn catalog() -> (Vec<Product>, CategoryTree) {
        let men = Category::root(tenant(), "Men", Slug::from_name("Men").unwrap());
        let shirts = Category::child_of(&men, "Shirts", Slug::from_name("Shirts").unwrap()).unwrap();
        let shoes = Category::root(tenant(), "Shoes", Slug::from_name("Shoes").unwrap());

        let mut oxford = details("Oxford Shirt", vec![variant("OX-1", 3)]);
        oxford.brand = Some("Acme".into());
        oxford.category_id = Some(shirts.id);
        oxford.tags = vec!["cotton".into()];

        let mut runner = details("Trail Runner", vec![variant("TR-1", 0), variant("TR-2", 2)]);
        runner.brand = Some("Swift".into());
        runner.base_price = Money::usd(Decimal::new(9000, 2));
        runner.variants[1].color = Some("Blue".into());
        runner.category_id = Some(shoes.id);

        let mut tee = details("Blue Tee", vec![variant("TEE-1", 5)]);
        tee.base_price = Money::usd(Decimal::new(1500, 2));
        tee.description = "Soft cotton tee".into();
        tee.category_id = Some(men.id);

        let products = vec![product(oxford, 10), product(runner, 3), product(tee, 1)];
        (products, CategoryTree::new(vec![men, shirts, shoes]))
    }

    fn params(q: &str) -> SearchParams { SearchParams { q: Some(q.into()), ..SearchParams::default() } }

    fn names(r: &SearchResults) -> Vec<&str> { r.data.iter().map(|p| p.name()).collect() }

    #[test]
    fn test_every_token_must_match_some_field() {
        let (products, tree) = catalog();
        let r = search_products(&products, &tree, &params("COTTON shirt")).unwrap();
        assert_eq!(names(&r), vec!["Oxford Shirt"]);
        // "blue" hits a name and a variant color.
        let r = search_products(&products, &tree, &params("blue")).unwrap();
        assert_eq!(r.total, 2);
        assert_eq!(r.data[0].name(), "Blue Tee");
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let (products, tree) = catalog();
        assert_eq!(search_products(&products, &tree, &params("shirt.*")).unwrap().total, 0);
    }

    #[test]
    fn test_category_expands_to_descendants() {
        let (products, tree) = catalog();
        let p = SearchParams { category: Some("men".into()), sort: SortOrder::Name, ..SearchParams::default() };
        let r = search_products(&products, &tree, &p).unwrap();
        assert_eq!(names(&r), vec!["Blue Tee", "Oxford Shirt"]);
        let p = SearchParams { category: Some("unknown".into()), ..SearchParams::default() };
        assert_eq!(search_products(&products, &tree, &p).unwrap().total, 0);
    }

    #[test]
    fn test_price_filters_and_sorts() {
        let (products, tree) = catalog();
        let p = SearchParams { min_price: Some(Decimal::new(20, 0)), sort: SortOrder::PriceDesc, ..SearchParams::default() };
        let r = search_products(&products, &tree, &p).unwrap();
        assert_eq!(names(&r), vec!["Trail Runner", "Oxford Shirt"]);
        let p = SearchParams { sort: SortOrder::Popular, ..SearchParams::default() };
        assert_eq!(search_products(&products, &tree, &p).unwrap().data[0].name(), "Oxford Shirt");
    }

    #[test]
    fn test_pagination_and_facets() {
        let (products, tree) = catalog();
        let p = SearchParams { per_page: Some(2), page: Some(2), ..SearchParams::default() };
        let r = search_products(&products, &tree, &p).unwrap();
        assert_eq!(r.total, 3);
        assert_eq!(r.data.len(), 1);
        assert_eq!(r.facets.brands.len(), 2);
        assert_eq!(r.facets.colors, vec![FacetCount { value: "Red".into(), count: 3 }, FacetCount { value: "Blue".into(), count: 1 }]);
        assert_eq!(r.facets.min_price, Some(Decimal::new(1500, 2)));
        assert_eq!(r.facets.max_price, Some(Decimal::new(9000, 2)));
    }

    #[test]
    fn test_did_you_mean() {
        let (products, tree) = catalog();
        let r = search_products(&products, &tree, &params("oxfrod shirtt")).unwrap();
        assert_eq!(r.total, 0);
        assert!(r.suggestions.contains(&"oxford shirtt".to_string()));
        assert!(r.suggestions.contains(&"oxfrod shirt".to_string()));
        assert!(r.suggestions.len() <= MAX_SUGGESTIONS);
    }

    #[test]
    fn test_long_queries_are_bounded() {
        let (products, tree) = catalog();
        let long = "a".repeat(MAX_QUERY_CHARS + 1);
        assert!(matches!(search_products(&products, &tree, &params(&long)), Err(CommerceError::InvalidInput(_))));
        let many = format!("shirt {}", "x ".repeat(MAX_TOKENS));
        assert_eq!(tokenize(&many).len(), MAX_TOKENS);
        assert!(search_products(&products, &tree, &params(&many)).is_ok());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("shirt", "shirt"), 0);
    }

    #[test]
    fn test_completes_on_word_prefix() {
        assert!(completes("Oxford Shirt", "shi"));
        assert!(completes("Oxford Shirt", "OX"));
        assert!(!completes("Oxford Shirt", "irt"));
        assert!(!completes("Oxford Shirt", " "));
    }
}
