//! DFS-order argument providers for channels.
//!
//! Each channel pulls its row order from a provider every sync. Providers
//! built from trees hand out the tree's cached order (cheap `Rc` clone) plus
//! its structural epoch; tests drive channels from fixed vectors instead.

use std::cell::RefCell;
use std::rc::Rc;

use strata_ecs::entity::Entity;
use strata_ecs::world::World;
use strata_scene::transform::TransformTree;
use strata_scene::tree::Tree;

/// A DFS order snapshot plus the epoch that produced it.
#[derive(Debug, Clone)]
pub struct OrderArgs {
    /// Entities in depth-first preorder (root first).
    pub order: Rc<Vec<Entity>>,
    /// Structural epoch of the producing tree.
    pub epoch: u64,
}

/// Produces [`OrderArgs`] from the world each sync.
pub type OrderProvider = Box<dyn Fn(&World) -> OrderArgs>;

/// Provider reading a plain [`Tree`]'s cached order.
pub fn tree_order(tree: &Rc<RefCell<Tree>>) -> OrderProvider {
    let tree = tree.clone();
    Box::new(move |_world| {
        let tree = tree.borrow();
        OrderArgs {
            order: tree.order(),
            epoch: tree.epoch(),
        }
    })
}

/// Provider reading a [`TransformTree`]'s cached order.
pub fn transform_tree_order(tree: &Rc<RefCell<TransformTree>>) -> OrderProvider {
    let tree = tree.clone();
    Box::new(move |_world| {
        let tree = tree.borrow();
        OrderArgs {
            order: tree.order(),
            epoch: tree.epoch(),
        }
    })
}

/// Provider over an externally owned [`OrderArgs`] cell.
///
/// Intended for tests: swap the order or bump the epoch in the cell to
/// simulate structural edits without a tree.
pub fn fixed_order(args: Rc<RefCell<OrderArgs>>) -> OrderProvider {
    Box::new(move |_world| args.borrow().clone())
}
