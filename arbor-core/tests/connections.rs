//! Integration tests for connections between stores.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arbor_core::{
    field, observe, Connection, Context, DependencyKey, Field, Identity, Model, RuntimeError, Store,
};

#[derive(Debug, Clone, Default, PartialEq)]
struct Draft {
    title: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct ListState {
    value: String,
    draft: Draft,
    editing: Option<Draft>,
    seen: Vec<String>,
}

enum ListAction {
    Retitle(&'static str),
    Edit(Option<&'static str>),
}

enum ListInput {
    Done,
}

struct List;

fn value() -> Field<ListState, String> {
    field!(ListState => value)
}

fn draft() -> Field<ListState, Draft> {
    field!(ListState => draft)
}

fn draft_title() -> Field<ListState, String> {
    field!(ListState => draft.title)
}

fn editing() -> Field<ListState, Option<Draft>> {
    field!(ListState => editing)
}

fn seen() -> Field<ListState, Vec<String>> {
    field!(ListState => seen)
}

impl Model for List {
    type State = ListState;
    type Action = ListAction;
    type Input = ListInput;
    type Output = Infallible;

    fn handle(&self, ctx: &Context<'_, Self>, action: ListAction) {
        match action {
            ListAction::Retitle(title) => {
                ctx.set(&draft_title(), title.to_string());
            }
            ListAction::Edit(title) => {
                let draft = title.map(|title| Draft {
                    title: title.to_string(),
                });
                ctx.set(&editing(), draft);
            }
        }
    }

    fn handle_input(&self, ctx: &Context<'_, Self>, input: ListInput) {
        match input {
            ListInput::Done => {
                ctx.set(&value(), "handled".to_string());
            }
        }
    }
}

enum EditorAction {
    Finish,
    Save,
    Retitle(&'static str),
    PokeParent,
    PokeSibling,
}

enum EditorOutput {
    Done,
    Saved(String),
}

struct Editor {
    disappeared: Arc<AtomicUsize>,
}

fn title() -> Field<Draft, String> {
    field!(Draft => title)
}

impl Model for Editor {
    type State = Draft;
    type Action = EditorAction;
    type Input = Infallible;
    type Output = EditorOutput;

    fn handle(&self, ctx: &Context<'_, Self>, action: EditorAction) {
        match action {
            EditorAction::Finish => ctx.output(EditorOutput::Done),
            EditorAction::Save => ctx.output(EditorOutput::Saved(ctx.get(&title()))),
            EditorAction::Retitle(title_text) => {
                ctx.set(&title(), title_text.to_string());
            }
            EditorAction::PokeParent => {
                ctx.parent::<List, _>(|parent| parent.set(&value(), "poked".to_string()));
            }
            EditorAction::PokeSibling => {
                ctx.sibling::<Row, _>(|row| row.update(&hits(), |n| *n += 1));
            }
        }
    }

    fn disappear(&self, _ctx: &Context<'_, Self>) {
        self.disappeared.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct RowState {
    hits: u32,
}

struct Row;

fn hits() -> Field<RowState, u32> {
    field!(RowState => hits)
}

impl Model for Row {
    type State = RowState;
    type Action = Infallible;
    type Input = Infallible;
    type Output = Infallible;

    fn handle(&self, _ctx: &Context<'_, Self>, action: Infallible) {
        match action {}
    }
}

struct Greeting;

impl DependencyKey for Greeting {
    type Value = String;
    const NAME: &'static str = "greeting";

    fn default_value() -> String {
        "hello".into()
    }
}

fn list() -> Store<List> {
    Store::new(List, ListState::default())
}

fn editor_factory() -> (Arc<AtomicUsize>, impl Fn() -> Editor + Send + Sync + 'static) {
    let disappeared = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disappeared);
    (disappeared, move || Editor {
        disappeared: Arc::clone(&counter),
    })
}

fn rows() -> Connection<List, Row> {
    Connection::fixed("row", || Row, RowState::default())
}

/// Test that one identity resolves to one child store
#[test]
fn identity_cache() {
    let root = list();
    let rows = rows();

    let first = root.connect_keyed(&rows, 1u64).unwrap();
    let again = root.connect_keyed(&rows, 1u64).unwrap();
    let other = root.connect_keyed(&rows, 2u64).unwrap();

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(root.graph().children_of(root.id()), vec![first.id(), other.id()]);
    assert_eq!(root.graph().identity_of(other.id()), Some(Identity::from(2u64)));
}

/// Test that two connections cannot share one identity
#[test]
fn identity_collision() {
    let root = list();
    let rows = rows();
    let pinned = Connection::fixed("pinned", || Row, RowState::default());

    root.connect_keyed(&rows, "7").unwrap();
    let err = root.connect_keyed(&pinned, "7").unwrap_err();

    match err {
        RuntimeError::IdentityCollision {
            existing, requested, ..
        } => {
            assert_eq!(existing, "row");
            assert_eq!(requested, "pinned");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(root.graph().len(), 2);
}

/// Test that a mapped output is handled by the parent before send returns
#[test]
fn mapped_output() {
    let root = list();
    let (_, make) = editor_factory();
    let editors =
        Connection::fixed("editor", make, Draft::default()).map_output(|output| match output {
            EditorOutput::Done | EditorOutput::Saved(_) => ListInput::Done,
        });

    let editor = root.connect(&editors).unwrap();
    editor.send(EditorAction::Finish).unwrap();

    assert_eq!(root.get(&value()), "handled");
}

/// Test that an output handler runs in the parent with access to the child
#[test]
fn output_handler() {
    let root = list();
    let (_, make) = editor_factory();
    let editors = Connection::fixed("editor", make, Draft::default()).on_output(
        |ctx, child, output| {
            if let EditorOutput::Saved(title) = output {
                let entry = format!("{title}@{}", child.id());
                ctx.update(&seen(), |seen| seen.push(entry));
            }
        },
    );

    let editor = root.connect(&editors).unwrap();
    editor.send(EditorAction::Retitle("notes")).unwrap();
    editor.send(EditorAction::Save).unwrap();
    editor.send(EditorAction::Finish).unwrap();

    assert_eq!(root.get(&seen()), vec![format!("notes@{}", editor.id())]);
    assert_eq!(root.get(&value()), "");
}

/// Test that a scoped child mirrors its parent field and writes back to it
#[test]
fn scoped_child() {
    let root = list();
    let (_, make) = editor_factory();
    let drafts = Connection::scoped("draft", make, draft());
    let editor = root.connect(&drafts).unwrap();

    root.send(ListAction::Retitle("from parent")).unwrap();
    assert_eq!(editor.get(&title()), "from parent");

    let fired = Arc::new(AtomicUsize::new(0));
    let hook = Arc::clone(&fired);
    let (_, _observation) = observe(
        || root.get(&draft_title()),
        move || {
            hook.fetch_add(1, Ordering::SeqCst);
        },
    );

    editor.send(EditorAction::Retitle("from child")).unwrap();
    assert_eq!(root.get(&draft_title()), "from child");
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

/// Test that a presented child lives exactly as long as its field is set
#[test]
fn presented_child() {
    let root = list();
    let (disappeared, make) = editor_factory();
    let sheets = Connection::presented("sheet", make, editing());

    let err = root.connect(&sheets).unwrap_err();
    assert_eq!(err, RuntimeError::NotPresented { connection: "sheet" });

    root.send(ListAction::Edit(Some("x"))).unwrap();
    let sheet = root.connect(&sheets).unwrap();
    assert_eq!(sheet.get(&title()), "x");

    sheet.send(EditorAction::Retitle("y")).unwrap();
    assert_eq!(root.state().editing, Some(Draft { title: "y".into() }));

    root.send(ListAction::Edit(None)).unwrap();
    assert!(!sheet.is_alive());
    assert_eq!(disappeared.load(Ordering::SeqCst), 1);
    assert!(sheet.send(EditorAction::Finish).unwrap_err().is_stale());
    assert_eq!(root.graph().len(), 1);

    root.send(ListAction::Edit(Some("z"))).unwrap();
    let next = root.connect(&sheets).unwrap();
    assert_ne!(next, sheet);
    assert_eq!(next.get(&title()), "z");
}

/// Test that stores reach their parent, siblings and children by model type
#[test]
fn graph_calls() {
    let root = list();
    let (_, make) = editor_factory();
    let editors = Connection::fixed("editor", make, Draft::default());
    let editor = root.connect(&editors).unwrap();
    let row = root.connect(&rows()).unwrap();

    editor.send(EditorAction::PokeParent).unwrap();
    editor.send(EditorAction::PokeSibling).unwrap();

    assert_eq!(root.get(&value()), "poked");
    assert_eq!(row.get(&hits()), 1);

    let from_root = root.with_context(|ctx| ctx.child::<Row, _>(|row| row.get(&hits()))).unwrap();
    assert_eq!(from_root, Some(1));
    let no_parent = root.with_context(|ctx| ctx.parent::<List, _>(|_| ())).unwrap();
    assert_eq!(no_parent, None);
    let no_sibling = row.with_context(|ctx| ctx.sibling::<Row, _>(|_| ())).unwrap();
    assert_eq!(no_sibling, None);
}

/// Test that keyed children can be found and disconnected by identity
#[test]
fn keyed_lookup_and_disconnect() {
    let root = list();
    let rows = rows();
    let first = root.connect_keyed(&rows, "a").unwrap();
    root.connect_keyed(&rows, "b").unwrap();

    root.with_context(|ctx| {
        ctx.child_keyed::<Row, _>("a", |row| row.set(&hits(), 3));
    })
    .unwrap();
    assert_eq!(first.get(&hits()), 3);

    let removed = root.with_context(|ctx| ctx.disconnect_keyed("a")).unwrap();
    assert!(removed);
    assert!(!first.is_alive());
    assert_eq!(root.graph().len(), 2);
}

/// Test that dependency overrides flow down to new children only
#[test]
fn dependency_scoping() {
    let root = list();
    let rows = rows();

    root.override_dependency::<Greeting>("hi".into());
    let early = root.connect_keyed(&rows, 1u64).unwrap();
    assert_eq!(early.dependency::<Greeting>(), "hi");

    early.override_dependency::<Greeting>("hey".into());
    assert_eq!(root.dependency::<Greeting>(), "hi");

    root.override_dependency::<Greeting>("bonjour".into());
    let late = root.connect_keyed(&rows, 2u64).unwrap();
    assert_eq!(early.dependency::<Greeting>(), "hey");
    assert_eq!(late.dependency::<Greeting>(), "bonjour");

    let greeted = rows.clone().dependency::<Greeting>("hallo".into());
    let local = root.connect_keyed(&greeted, 3u64).unwrap();
    assert_eq!(local.dependency::<Greeting>(), "hallo");
    assert_eq!(root.dependency::<Greeting>(), "bonjour");
}

/// Test that the graph snapshot describes the tree
#[test]
fn graph_snapshot() {
    let root = list();
    let row = root.connect_keyed(&rows(), "r1").unwrap();

    let nodes = root.graph().nodes();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].model, "List");
    assert_eq!(nodes[0].children, vec![row.id().raw()]);
    assert_eq!(nodes[1].model, "Row");
    assert_eq!(nodes[1].parent, Some(root.id().raw()));
    assert_eq!(nodes[1].identity.as_deref(), Some("r1"));

    let json = serde_json::to_value(&nodes).unwrap();
    assert_eq!(json[1]["model"], "Row");
}

/// Test that destroying a parent destroys its subtree
#[test]
fn destroy_cascades() {
    let root = list();
    let (disappeared, make) = editor_factory();
    let editors = Connection::fixed("editor", make, Draft::default());
    let editor = root.connect(&editors).unwrap();
    let row = root.connect(&rows()).unwrap();

    root.destroy();

    assert!(!editor.is_alive());
    assert!(!row.is_alive());
    assert_eq!(disappeared.load(Ordering::SeqCst), 1);
    assert!(root.graph().is_empty());
}

/// Test that a child destroyed through its own handle is released by its
/// parent and a later connect builds a fresh one
#[test]
fn destroyed_child_leaves_parent() {
    let root = list();
    let rows = rows();
    let row = root.connect_keyed(&rows, "a").unwrap();
    let weak = row.downgrade();

    row.destroy();
    drop(row);

    assert!(weak.is_released());
    assert!(root.is_alive());
    assert!(root.graph().children_of(root.id()).is_empty());
    assert_eq!(root.graph().len(), 1);

    let fresh = root.connect_keyed(&rows, "a").unwrap();
    assert!(fresh.is_alive());
    assert_eq!(fresh.get(&hits()), 0);
    assert_eq!(root.graph().len(), 2);
}

/// Test that a panicking output mapping does not fail the child's send
#[test]
fn output_mapping_panic_is_contained() {
    let root = list();
    let (_, make) = editor_factory();
    let editors = Connection::fixed("editor", make, Draft::default())
        .map_output(|_: EditorOutput| -> ListInput { panic!("mapping exploded") });

    let editor = root.connect(&editors).unwrap();
    editor.send(EditorAction::Finish).unwrap();
    editor.send(EditorAction::Retitle("still here")).unwrap();

    assert_eq!(editor.get(&title()), "still here");
    assert_eq!(root.get(&value()), "");
    root.send(ListAction::Retitle("parent")).unwrap();
    assert_eq!(root.get(&draft_title()), "parent");
}
