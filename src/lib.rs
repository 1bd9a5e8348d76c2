//! # Weft Runtime Ground Rules
//!
//! Weft is a declarative markup layer embedded in ordinary HTML documents:
//! structural tags for iteration, conditionals, component templates and URL
//! synchronization, plus `{…}` pure and `@{…}` effect expressions over a
//! set of reactive state namespaces.
//!
//! ## Identity and state invariants
//!
//! 1. **Handles carry no value.** `@Name.path` is `(root, path)`; reads and
//!    writes resolve through the substrate at the moment of use. Pure-mode
//!    writes fail with `W-ERR-PURE-001`.
//!
//! 2. **SIDs key off source position.** Every rendered element's identifier
//!    derives from its parent SID, its source segment (or explicit marker),
//!    and its iteration key. Conditional flips and row-count changes never
//!    move a sibling's SID.
//!
//! 3. **Local state is SID-keyed.** `local:{SID}` namespaces persist across
//!    rerenders and unmounts unless `clear-on-unmount` drops them.
//!
//! 4. **The expression cache is scope-structural.** Entries key on
//!    `(text, handle-signature)`; `$`-values participate per call and never
//!    widen the key.
//!
//! 5. **Attributes evaluate in a fixed order.** `import` → `init` → `def` →
//!    `test` → everything else, then children.
//!
//! 6. **Effect mutations batch.** Writes inside one handler observe as one
//!    rerender; the URL synchronizer debounces through the same microtask
//!    queue.
//!
//! 7. **No global substrate.** The bootstrap constructs it once and injects
//!    it into the renderer.

mod bootstrap;
mod compile;
mod component;
mod error;
mod eval;
mod expr;
mod form;
mod handle;
mod parse;
mod render;
mod scope;
mod sid;
mod substrate;
mod url;
mod value;
mod vdom;

pub use bootstrap::{boot, boot_in_memory, App, BootOptions};
pub use compile::{Callable, CompileStrategy, CompiledEntry, ExprCompiler, Interpolation, Segment};
pub use component::{ComponentDef, SlotCtx};
pub use error::RuntimeError;
pub use eval::{EvalCtx, Slot};
pub use handle::{Handle, Mode};
pub use parse::{parse_document, ParsedDocument, TemplateNode};
pub use render::{Ctx, Renderer};
pub use scope::{FlatScope, Scope};
pub use sid::{child_sid, local_ns};
pub use substrate::Substrate;
pub use url::{parse_fragment, serialize_segment, MemoryUrlHost, UrlHost, UrlSync};
pub use vdom::{VComponent, VElement, VNode};

#[cfg(test)]
mod expression_tests;
#[cfg(test)]
mod render_tests;
