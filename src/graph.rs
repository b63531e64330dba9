//! Module trait and arena-based model graph
//!
//! A model is a tree of named module nodes. The tree itself is owned by a
//! [`ModelGraph`]: an arena of slots addressed by stable [`NodeId`] handles,
//! with the parent/child edges kept in the slots rather than inside the
//! modules. Replacing a module is a single-slot swap: the handle, the node's
//! path, and the containing structure all keep their identity, which is
//! exactly what the injector needs.
//!
//! Module types are identified by a [`ModuleKind`] tag (owning namespace plus
//! type name). Policy lookup resolves kinds once at registration time; no
//! per-traversal reflection.

use std::any::Any;
use std::fmt;

use crate::error::{InyectarError, Result};
use crate::tensor::{Parameter, Tensor};

/// Identity tag for a concrete module type
///
/// The pair mirrors the (owning-namespace, type-name) convention used to
/// address module classes in model frameworks, e.g.
/// `("inyectar.modules.attention", "SelfAttention")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleKind {
    /// Namespace that owns the type, typically the defining module path
    pub namespace: &'static str,
    /// Concrete type name
    pub name: &'static str,
}

impl ModuleKind {
    /// Create a module kind tag
    #[must_use]
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// A named, composable unit in the model graph
///
/// Modules own their learnable parameters and implement forward compute;
/// tree structure lives in the [`ModelGraph`]. The `as_any` methods give
/// policies typed access to the concrete module behind a `dyn Module`.
pub trait Module: fmt::Debug + Send + Sync + 'static {
    /// Type tag used for policy lookup
    fn kind(&self) -> ModuleKind;

    /// Parameters declared directly on this module, with their names
    ///
    /// Names are dotted where the module nests projections internally
    /// (e.g. `q.weight`). Container modules return an empty list.
    fn parameters(&self) -> Vec<(&'static str, &Parameter)>;

    /// Forward compute
    ///
    /// # Errors
    ///
    /// Returns an error if the input shape doesn't match the module.
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Typed view of the concrete module
    fn as_any(&self) -> &dyn Any;

    /// Mutable typed view of the concrete module
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Stable handle to a node in a [`ModelGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Container module for interior nodes
///
/// Blocks carry no parameters and no compute of their own; they exist so a
/// graph can group children under a named namespace (a transformer block,
/// an encoder stack). Forward is identity.
#[derive(Debug, Default)]
pub struct Block;

impl Block {
    /// Type tag for [`Block`]
    pub const KIND: ModuleKind = ModuleKind::new("inyectar.graph", "Block");
}

impl Module for Block {
    fn kind(&self) -> ModuleKind {
        Self::KIND
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        Vec::new()
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One arena slot: a module payload plus its edges
#[derive(Debug)]
struct Slot {
    /// Attribute name under the parent (`"root"` for the root node)
    name: String,
    /// Parent handle, `None` for the root
    parent: Option<NodeId>,
    /// Module payload; swapped atomically by [`ModelGraph::replace`]
    module: Box<dyn Module>,
    /// Named children in insertion order
    children: Vec<(String, NodeId)>,
}

/// Arena-owned model tree
///
/// # Examples
///
/// ```
/// use inyectar::graph::{Block, ModelGraph};
///
/// let mut graph = ModelGraph::new(Box::new(Block));
/// let root = graph.root();
/// assert_eq!(graph.path(root).unwrap(), "root");
/// ```
#[derive(Debug)]
pub struct ModelGraph {
    slots: Vec<Slot>,
    root: NodeId,
}

impl ModelGraph {
    /// Create a graph with the given root module
    #[must_use]
    pub fn new(root_module: Box<dyn Module>) -> Self {
        let root = NodeId(0);
        Self {
            slots: vec![Slot {
                name: "root".to_string(),
                parent: None,
                module: root_module,
                children: Vec::new(),
            }],
            root,
        }
    }

    /// Handle of the root node
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the graph
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the graph has no nodes besides the root
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.len() <= 1
    }

    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots.get(id.0).ok_or(InyectarError::NodeNotFound(id))
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.0)
            .ok_or(InyectarError::NodeNotFound(id))
    }

    /// Attach a module as a named child of `parent`
    ///
    /// # Errors
    ///
    /// Returns an error if `parent` is stale or already has a child with
    /// this name.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        module: Box<dyn Module>,
    ) -> Result<NodeId> {
        let parent_slot = self.slot(parent)?;
        if parent_slot.children.iter().any(|(n, _)| n == name) {
            return Err(InyectarError::InvalidConfiguration(format!(
                "node '{}' already has a child named '{name}'",
                parent_slot.name
            )));
        }

        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            name: name.to_string(),
            parent: Some(parent),
            module,
            children: Vec::new(),
        });
        self.slot_mut(parent)?.children.push((name.to_string(), id));
        Ok(id)
    }

    /// Borrow the module at `id`
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn module(&self, id: NodeId) -> Result<&dyn Module> {
        Ok(self.slot(id)?.module.as_ref())
    }

    /// Mutably borrow the module at `id`
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn module_mut(&mut self, id: NodeId) -> Result<&mut (dyn Module + 'static)> {
        Ok(self.slot_mut(id)?.module.as_mut())
    }

    /// Named children of `id`, in insertion order
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn children(&self, id: NodeId) -> Result<&[(String, NodeId)]> {
        Ok(&self.slot(id)?.children)
    }

    /// Swap the module at `id` for `replacement`, returning the old payload
    ///
    /// The slot's handle, name, parent, and child edges are untouched: the
    /// containing structure keeps its identity and only the payload changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn replace(&mut self, id: NodeId, replacement: Box<dyn Module>) -> Result<Box<dyn Module>> {
        let slot = self.slot_mut(id)?;
        Ok(std::mem::replace(&mut slot.module, replacement))
    }

    /// Resolve a dotted path (e.g. `"encoder.attn"`) from the root
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        if path.is_empty() {
            return Some(current);
        }
        for segment in path.split('.') {
            let children = &self.slots.get(current.0)?.children;
            current = children.iter().find(|(n, _)| n == segment)?.1;
        }
        Some(current)
    }

    /// Dotted path of a node, starting at `"root"`
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is stale.
    pub fn path(&self, id: NodeId) -> Result<String> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            let slot = self.slot(node)?;
            segments.push(slot.name.clone());
            current = slot.parent;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    /// All nodes in depth-first order with their dotted paths
    #[must_use]
    pub fn walk(&self) -> Vec<(NodeId, String)> {
        let mut out = Vec::with_capacity(self.slots.len());
        let mut stack = vec![(self.root, "root".to_string())];
        while let Some((id, path)) = stack.pop() {
            if let Ok(slot) = self.slot(id) {
                for (name, child) in slot.children.iter().rev() {
                    stack.push((*child, format!("{path}.{name}")));
                }
            }
            out.push((id, path));
        }
        out
    }
}
