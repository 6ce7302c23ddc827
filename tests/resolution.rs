//! End-to-end tests: catalog → resolution → dataflow → merge → encoding.

use std::collections::HashSet;
use std::sync::Arc;

use twinflow::catalog::{CandidateIndex, InMemoryCatalog, TaxonomyReasoner};
use twinflow::config::ResolverConfig;
use twinflow::coverage::Coverage;
use twinflow::dataflow::{Dataflow, DataflowCompiler, DataflowEncoder, merge};
use twinflow::error::{DataflowError, ErrorCode};
use twinflow::id::{ActuatorId, AtomicIdAllocator};
use twinflow::model::{Contextualizable, Dependency, Model, Version};
use twinflow::observable::{Concept, Observable, ResolutionMode};
use twinflow::resolution::{BranchOutcome, Resolution, ResolutionBuilder};
use twinflow::scale::{Dimension, Scale};
use twinflow::scope::{ContextScope, ResolutionConstraint, ResolutionConstraints};

fn obs(def: &str) -> Observable {
    def.parse().unwrap()
}

fn region() -> Scale {
    Scale::space(0.0, 4.0, 0.0, 2.0).unwrap()
}

fn scope() -> ContextScope {
    ContextScope::new("test.context", region())
}

fn index(models: Vec<Model>) -> CandidateIndex {
    let catalog = InMemoryCatalog::new();
    for m in models {
        catalog.insert(m).unwrap();
    }
    CandidateIndex::new(Arc::new(catalog), Arc::new(TaxonomyReasoner::new()))
}

fn resolve_in(models: Vec<Model>, target: &str, scope: &ContextScope) -> Resolution {
    let idx = index(models);
    let config = ResolverConfig::default();
    ResolutionBuilder::new(&idx, &config)
        .resolve(&obs(target), scope)
        .unwrap()
}

fn resolve(models: Vec<Model>, target: &str) -> Resolution {
    resolve_in(models, target, &scope())
}

fn compile(resolution: &Resolution, allocator: &AtomicIdAllocator) -> Dataflow {
    DataflowCompiler::new(allocator).compile(resolution).unwrap()
}

fn has_code(resolution: &Resolution, code: ErrorCode) -> bool {
    resolution.notifications.iter().any(|n| n.code == Some(code))
}

// ── Coverage algebra ────────────────────────────────────────────────────

#[test]
fn coverage_merge_is_monotone_and_idempotent() {
    let s = region();
    let halves = s.split(Dimension::X, 2).unwrap();
    let quarters = s.split(Dimension::Y, 4).unwrap();
    let samples = vec![
        Coverage::empty(s.clone()),
        Coverage::full(s.clone()),
        Coverage::of(s.clone(), [&halves[0]]),
        Coverage::of(s.clone(), [&halves[1]]),
        Coverage::of(s.clone(), [&quarters[1], &quarters[2]]),
        Coverage::of(s.clone(), [&Scale::space(1.0, 3.0, 0.5, 1.5).unwrap()]),
    ];
    for a in &samples {
        assert_eq!(&a.merge(a), a);
        for b in &samples {
            let m = a.merge(b);
            assert!(m.fraction() + 1e-12 >= a.fraction().max(b.fraction()));
            assert!((m.fraction() - b.merge(a).fraction()).abs() < 1e-12);
        }
    }
}

#[test]
fn overlapping_coverage_is_counted_once() {
    let s = region();
    let a = Coverage::of(s.clone(), [&Scale::space(0.0, 3.0, 0.0, 2.0).unwrap()]);
    let b = Coverage::of(s.clone(), [&Scale::space(1.0, 4.0, 0.0, 2.0).unwrap()]);
    assert!((a.fraction() - 0.75).abs() < 1e-12);
    assert!(a.merge(&b).is_complete(1e-9));
    assert!((a.gain(&b) - 0.25).abs() < 1e-12);
    assert!((a.intersect(&b).fraction() - 0.5).abs() < 1e-12);
}

// ── Resolution ──────────────────────────────────────────────────────────

#[test]
fn completeness_survives_more_candidates() {
    let one = resolve(vec![Model::new("im.first", obs("t:A"))], "t:A");
    assert!(one.is_complete());

    let more = resolve(
        vec![
            Model::new("im.first", obs("t:A")).with_priority(5),
            Model::new("im.second", obs("t:A")),
            Model::new("im.third", obs("t:A")).covering(Scale::space(0.0, 1.0, 0.0, 1.0).unwrap()),
        ],
        "t:A",
    );
    assert!(more.is_complete());
    assert_eq!(more.models(), vec!["im.first"]);
}

#[test]
fn cycle_terminates_and_sibling_candidate_wins() {
    let models = vec![
        Model::new("im.a.cyclic", obs("t:A"))
            .with_priority(10)
            .depends_on(Dependency::new(obs("t:B"))),
        Model::new("im.b", obs("t:B")).depends_on(Dependency::new(obs("t:A"))),
        Model::new("im.a.plain", obs("t:A")),
    ];
    let res = resolve(models, "t:A");
    assert!(has_code(&res, ErrorCode::CircularReferences));
    assert!(res.is_complete());
    assert_eq!(res.models(), vec!["im.a.plain"]);
    assert_eq!(res.outcome, BranchOutcome::Resolved);
}

#[test]
fn pure_cycle_resolves_to_nothing() {
    let models = vec![
        Model::new("im.a", obs("t:A")).depends_on(Dependency::new(obs("t:B"))),
        Model::new("im.b", obs("t:B")).depends_on(Dependency::new(obs("t:A"))),
    ];
    let res = resolve(models, "t:A");
    assert!(res.is_empty());
    assert!(has_code(&res, ErrorCode::CircularReferences));
}

#[test]
fn full_coverage_single_model() {
    let res = resolve(vec![Model::new("im.only", obs("t:A"))], "t:A");
    assert_eq!(res.len(), 1);
    assert!(res.is_complete());

    let df = compile(&res, &AtomicIdAllocator::new());
    assert_eq!(df.actuators.len(), 1);
    assert!(df.actuators[0].children.is_empty());
    assert!(df.coverage.is_complete(1e-6));
    assert_eq!(df.target, Some(df.actuators[0].id));
}

#[test]
fn two_halves_make_a_whole() {
    let halves = region().split(Dimension::X, 2).unwrap();
    let models = vec![
        Model::new("im.west", obs("t:A")).covering(halves[0].clone()),
        Model::new("im.east", obs("t:A")).covering(halves[1].clone()),
    ];
    let res = resolve(models, "t:A");
    assert!(res.is_complete());
    assert_eq!(res.roots.len(), 2);
    for root in &res.roots {
        let node = res.node(*root).unwrap();
        assert!(!node.coverage.is_complete(1e-6));
    }

    let df = compile(&res, &AtomicIdAllocator::new());
    assert_eq!(df.actuators.len(), 2);
    assert!(df.coverage.is_complete(1e-6));
}

#[test]
fn unresolved_dependency_rejects_candidate_without_error() {
    let models = vec![Model::new("im.a", obs("t:A")).depends_on(Dependency::new(obs("t:B")))];
    let res = resolve(models, "t:A");
    assert!(res.is_empty());
    assert!(!res.is_complete());
    assert!(has_code(&res, ErrorCode::UnresolvedReference));

    let df = compile(&res, &AtomicIdAllocator::new());
    assert!(df.is_empty());
    assert!(!df.notifications.is_empty());
}

#[test]
fn dependencies_become_children_in_declared_order() {
    let models = vec![
        Model::new("im.runoff", obs("hydrology:Runoff"))
            .depends_on(Dependency::new(obs("weather:Rainfall")))
            .depends_on(Dependency::new(obs("geography:Slope")))
            .depends_on(Dependency::new(obs("soil:Permeability")))
            .computing(Contextualizable::expression("rainfall * slope")),
        Model::new("im.rain", obs("weather:Rainfall")),
        Model::new("im.slope", obs("geography:Slope")),
        Model::new("im.soil", obs("soil:Permeability")),
    ];
    let res = resolve(models, "hydrology:Runoff");
    let df = compile(&res, &AtomicIdAllocator::new());
    let names: Vec<String> = df.actuators[0]
        .children
        .iter()
        .map(|a| a.observable.urn())
        .collect();
    assert_eq!(
        names,
        vec!["weather:Rainfall", "geography:Slope", "soil:Permeability"]
    );
    assert!(df.requirements.contains("im.runoff"));
}

#[test]
fn subsumed_models_answer_any_queries() {
    let catalog = InMemoryCatalog::new();
    catalog.insert(Model::new("im.dem", obs("geography:Elevation"))).unwrap();
    let reasoner = TaxonomyReasoner::new();
    reasoner
        .add_is_a(
            &Concept::new("geography:Elevation").unwrap(),
            &Concept::new("geography:Height").unwrap(),
        )
        .unwrap();
    let idx = CandidateIndex::new(Arc::new(catalog), Arc::new(reasoner));
    let config = ResolverConfig::default();

    let exact = ResolutionBuilder::new(&idx, &config)
        .resolve(&obs("geography:Height"), &scope())
        .unwrap();
    assert!(exact.is_empty());

    let any = ResolutionBuilder::new(&idx, &config)
        .resolve(&obs("geography:Height").with_mode(ResolutionMode::Any), &scope())
        .unwrap();
    assert!(any.is_complete());
    assert_eq!(any.models(), vec!["im.dem"]);
}

#[test]
fn scope_constraints_steer_selection() {
    let models = vec![
        Model::new("im.a.old", obs("t:A")).with_priority(3),
        Model::new("im.a.new", obs("t:A"))
            .with_version("2.0".parse::<Version>().unwrap()),
    ];

    let excluded = scope().with_resolution_constraints(
        &ResolutionConstraints::new().with(ResolutionConstraint::exclude_model("im.a.old")),
    );
    assert_eq!(resolve_in(models.clone(), "t:A", &excluded).models(), vec!["im.a.new"]);

    let pinned = scope().with_resolution_constraints(&ResolutionConstraints::new().with(
        ResolutionConstraint::model_version("im.a.old", "9.0".parse().unwrap()),
    ));
    let res = resolve_in(models, "t:A", &pinned);
    assert_eq!(res.models(), vec!["im.a.new"]);
    assert!(has_code(&res, ErrorCode::MismatchedVersion));
}

// ── Compilation, merge and encoding ─────────────────────────────────────

#[test]
fn actuator_ids_are_unique_across_compilations() {
    let models = vec![
        Model::new("im.a", obs("t:A"))
            .depends_on(Dependency::new(obs("t:B")))
            .depends_on(Dependency::new(obs("t:C"))),
        Model::new("im.b", obs("t:B")),
        Model::new("im.c", obs("t:C")),
    ];
    let res = resolve(models, "t:A");
    let allocator = AtomicIdAllocator::new();

    let n = 25;
    let mut seen: HashSet<ActuatorId> = HashSet::new();
    let mut total = 0;
    for _ in 0..n {
        let df = compile(&res, &allocator);
        for id in df.ids() {
            seen.insert(id);
            total += 1;
        }
    }
    assert_eq!(total, n * 3);
    assert_eq!(seen.len(), total);
}

#[test]
fn actuator_ids_are_unique_across_threads() {
    let models = vec![
        Model::new("im.a", obs("t:A")).depends_on(Dependency::new(obs("t:B"))),
        Model::new("im.b", obs("t:B")),
    ];
    let res = Arc::new(resolve(models, "t:A"));
    let allocator = Arc::new(AtomicIdAllocator::new());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let res = Arc::clone(&res);
            let allocator = Arc::clone(&allocator);
            std::thread::spawn(move || {
                (0..10)
                    .flat_map(|_| compile(&res, &allocator).ids())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let ids: Vec<ActuatorId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(ids.len(), 4 * 10 * 2);
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn merged_roots_nest_one_level_under_hook() {
    let allocator = AtomicIdAllocator::new();
    let base = resolve(
        vec![
            Model::new("im.a", obs("t:A")).depends_on(Dependency::new(obs("t:Hook"))),
            Model::new("im.hook", obs("t:Hook")),
        ],
        "t:A",
    );
    let mut d1 = compile(&base, &allocator);
    let hook = d1.actuators[0].children[0].id;

    let x = compile(&resolve(vec![Model::new("im.x", obs("t:X"))], "t:X"), &allocator);
    let y = compile(&resolve(vec![Model::new("im.y", obs("t:Y"))], "t:Y"), &allocator);
    let mut d2 = Dataflow::empty(region());
    merge::add(&mut d2, x, &scope()).unwrap();
    merge::add(&mut d2, y, &scope()).unwrap();
    assert_eq!(d2.actuators.len(), 2);

    merge::add(&mut d1, d2, &scope().within(hook)).unwrap();

    let encoded = DataflowEncoder::default().encode(&d1, &scope());
    let hook_line = "      observe t:Hook";
    let x_line = "            observe t:X";
    let y_line = "            observe t:Y";
    let hook_at = encoded.find(hook_line).unwrap();
    let x_at = encoded.find(x_line).unwrap();
    let y_at = encoded.find(y_line).unwrap();
    assert!(hook_at < x_at && x_at < y_at, "{encoded}");
    assert!(!encoded.contains("                  observe t:X"));

    let hooked = d1.find(hook).unwrap();
    let children: Vec<String> = hooked.children.iter().map(|a| a.observable.urn()).collect();
    assert_eq!(children, vec!["t:X", "t:Y"]);
}

#[test]
fn encoding_is_deterministic() {
    let models = vec![
        Model::new("im.a", obs("t:A"))
            .depends_on(Dependency::new(obs("t:B")))
            .depends_on(Dependency::new(obs("t:C")).deferred())
            .computing(Contextualizable::resources(["im:data.a"]))
            .computing(Contextualizable::literal(1i64)),
        Model::new("im.b", obs("t:B")),
    ];
    let df = compile(&resolve(models, "t:A"), &AtomicIdAllocator::new());
    let encoder = DataflowEncoder::default();
    let first = encoder.encode(&df, &scope());
    let second = encoder.encode(&df, &scope());
    assert_eq!(first, second);
    assert!(first.starts_with("dataflow test.context\n;"));
    assert!(first.contains("resolve obs"));
    assert!(first.contains("core.deferred"));
}

#[test]
fn merge_with_unknown_hook_is_loud_and_harmless() {
    let allocator = AtomicIdAllocator::new();
    let mut d1 = compile(&resolve(vec![Model::new("im.a", obs("t:A"))], "t:A"), &allocator);
    let before = d1.clone();
    let d2 = compile(&resolve(vec![Model::new("im.b", obs("t:B"))], "t:B"), &allocator);

    let stray = ActuatorId::new(9_999).unwrap();
    let err = merge::add(&mut d1, d2, &scope().within(stray)).unwrap_err();
    assert!(matches!(err, DataflowError::HookNotFound { actuator_id: 9_999, .. }));
    assert_eq!(d1, before);
}

#[test]
fn dataflow_json_roundtrip_keeps_encoding() {
    let models = vec![
        Model::new("im.a", obs("t:A"))
            .depends_on(Dependency::new(obs("t:B")))
            .computing(Contextualizable::expression("b + 1")),
        Model::new("im.b", obs("t:B")).computing(Contextualizable::literal(2.5)),
    ];
    let df = compile(&resolve(models, "t:A"), &AtomicIdAllocator::new());
    let json = serde_json::to_string(&df).unwrap();
    let back: Dataflow = serde_json::from_str(&json).unwrap();
    let encoder = DataflowEncoder::default();
    assert_eq!(encoder.encode(&back, &scope()), encoder.encode(&df, &scope()));
}
