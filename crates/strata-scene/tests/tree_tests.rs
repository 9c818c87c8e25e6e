//! Integration and property tests for tree invariants.

use proptest::prelude::*;
use strata_ecs::meta::hierarchy_node_meta;
use strata_ecs::prelude::*;
use strata_scene::prelude::*;

fn add_member(
    world: &mut World,
    tree: &std::rc::Rc<std::cell::RefCell<Tree>>,
    parent: Option<Entity>,
) -> Entity {
    let e = world.create_entity();
    world.store_mut("node").unwrap().add(e, &[]);
    tree.borrow_mut().set_parent(world, e, parent).unwrap();
    e
}

#[test]
fn dfs_order_and_child_promotion() {
    let mut world = World::new();
    let tree = Tree::new(&mut world, None, hierarchy_node_meta("node"), &[]).unwrap();
    let root = tree.borrow().root();

    let a = add_member(&mut world, &tree, None);
    let b = add_member(&mut world, &tree, Some(a));
    let c = add_member(&mut world, &tree, Some(a));
    let d = add_member(&mut world, &tree, None);
    let e = add_member(&mut world, &tree, Some(d));

    assert_eq!(*tree.borrow().order(), vec![root, a, b, c, d, e]);

    tree.borrow_mut().remove(&mut world, a).unwrap();
    assert_eq!(*tree.borrow().order(), vec![root, d, e, b, c]);
}

#[test]
fn dfs_order_is_reproducible_across_worlds() {
    let build = || {
        let mut world = World::new();
        let tree = Tree::new(&mut world, None, hierarchy_node_meta("node"), &[]).unwrap();
        let a = add_member(&mut world, &tree, None);
        let _b = add_member(&mut world, &tree, Some(a));
        let c = add_member(&mut world, &tree, None);
        let _d = add_member(&mut world, &tree, Some(c));
        let order: Vec<u32> = tree.borrow().order().iter().map(|e| e.index()).collect();
        order
    };
    assert_eq!(build(), build());
}

#[test]
fn hierarchy_schema_gates_tree_construction() {
    let mut world = World::new();
    let no_links = ComponentMeta::new("flat", vec![FieldMeta::f32("x", 0.0)]);
    assert!(matches!(
        Tree::new(&mut world, None, no_links, &[]),
        Err(SceneError::InvalidHierarchyMeta { .. })
    ));
    assert!(is_hierarchy_meta(&hierarchy_node_meta("node")));
}

#[test]
fn destroying_entity_in_two_trees_cascades_both() {
    let mut world = World::new();
    let t1 = Tree::new(&mut world, None, hierarchy_node_meta("n1"), &[]).unwrap();
    let t2 = Tree::new(&mut world, None, hierarchy_node_meta("n2"), &[]).unwrap();

    let shared = world.create_entity();
    world.store_mut("n1").unwrap().add(shared, &[]);
    world.store_mut("n2").unwrap().add(shared, &[]);
    t1.borrow_mut().set_parent(&mut world, shared, None).unwrap();
    t2.borrow_mut().set_parent(&mut world, shared, None).unwrap();

    world.destroy_entity(shared).unwrap();
    assert!(!world.store("n1").unwrap().has(shared));
    assert!(!world.store("n2").unwrap().has(shared));
    assert_eq!(t1.borrow().order().len(), 1);
    assert_eq!(t2.borrow().order().len(), 1);
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum TreeOp {
    Spawn(usize),
    Reparent(usize, usize),
    Remove(usize),
}

fn tree_op_strategy() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        (0..32usize).prop_map(TreeOp::Spawn),
        (0..32usize, 0..32usize).prop_map(|(a, b)| TreeOp::Reparent(a, b)),
        (0..32usize).prop_map(TreeOp::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn random_edits_keep_single_root_and_no_cycles(
        ops in prop::collection::vec(tree_op_strategy(), 1..40)
    ) {
        let mut world = World::new();
        let tree = Tree::new(&mut world, None, hierarchy_node_meta("node"), &[]).unwrap();
        let root = tree.borrow().root();
        let mut members: Vec<Entity> = Vec::new();

        for op in ops {
            match op {
                TreeOp::Spawn(pick) => {
                    let parent = if members.is_empty() {
                        None
                    } else {
                        Some(members[pick % members.len()])
                    };
                    let e = world.create_entity();
                    world.store_mut("node").unwrap().add(e, &[]);
                    tree.borrow_mut().set_parent(&mut world, e, parent).unwrap();
                    members.push(e);
                }
                TreeOp::Reparent(a, b) => {
                    if !members.is_empty() {
                        let child = members[a % members.len()];
                        let parent = members[b % members.len()];
                        // Descendant targets legitimately fail; anything else
                        // must succeed.
                        let result = tree.borrow_mut().set_parent(&mut world, child, Some(parent));
                        if let Err(err) = result {
                            prop_assert!(
                                matches!(err, SceneError::ReparentToDescendant { .. }),
                                "unexpected error variant"
                            );
                        }
                    }
                }
                TreeOp::Remove(pick) => {
                    if !members.is_empty() {
                        let victim = members.remove(pick % members.len());
                        tree.borrow_mut().remove(&mut world, victim).unwrap();
                    }
                }
            }

            // Parent chains all terminate at root within `size` hops.
            let store = world.store("node").unwrap();
            for &m in &members {
                let mut cursor = m;
                let mut hops = 0usize;
                loop {
                    match tree.borrow().parent_of(&world, cursor) {
                        Some(p) => {
                            cursor = p;
                            hops += 1;
                            prop_assert!(hops <= store.size(), "cycle detected");
                        }
                        None => break,
                    }
                }
                prop_assert_eq!(cursor, root);
            }

            // The DFS order covers root + all members exactly once.
            let order = tree.borrow().order();
            prop_assert_eq!(order.len(), members.len() + 1);
            prop_assert_eq!(order[0], root);
            let mut seen: Vec<u32> = order.iter().map(|e| e.index()).collect();
            seen.sort_unstable();
            seen.dedup();
            prop_assert_eq!(seen.len(), members.len() + 1);
        }
    }
}
