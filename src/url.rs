//! URL-fragment synchronization.
//!
//! The fragment begins with `#`; further `#` separate segments. A segment is
//! either a URL-safe `key=value&…` form (scalar-only maps) or URL-encoded
//! JSON (maps containing objects or arrays). Keys serialize sorted so output
//! is stable. Inbound, the parsed fragment overwrites the whole `url`
//! namespace; outbound, the synchronizer unions the key lists of mounted
//! URL-annotation nodes, filters the namespace, and writes back only on
//! difference — so unknown keys survive parsing but drop on the next sync.

use crate::handle::Handle;
use crate::substrate::Substrate;
use crate::value::{display_value, stable_stringify};
use crate::vdom::find_by_tag;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

pub const URL_NAMESPACE: &str = "url";

// ═══════════════════════════════════════════════════════════════════════════════
// HOST ABSTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

/// The document-location collaborator. Production hosts wrap the window;
/// tests use the in-memory host.
pub trait UrlHost {
    fn read_fragment(&self) -> String;
    fn write_fragment(&self, fragment: &str);
}

pub struct MemoryUrlHost {
    fragment: RefCell<String>,
}

impl MemoryUrlHost {
    pub fn new(initial: &str) -> Rc<Self> {
        Rc::new(MemoryUrlHost {
            fragment: RefCell::new(initial.to_string()),
        })
    }
}

impl UrlHost for MemoryUrlHost {
    fn read_fragment(&self) -> String {
        self.fragment.borrow().clone()
    }

    fn write_fragment(&self, fragment: &str) {
        *self.fragment.borrow_mut() = fragment.to_string();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAGMENT GRAMMAR
// ═══════════════════════════════════════════════════════════════════════════════

fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(&h), Some(&l)) = (bytes.get(i + 1), bytes.get(i + 2)) {
                if let (Some(hi), Some(lo)) =
                    ((h as char).to_digit(16), (l as char).to_digit(16))
                {
                    out.push((hi * 16 + lo) as u8);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a fragment into a key/value map. Accepts any mix of query-form and
/// JSON segments; query values stay strings.
pub fn parse_fragment(fragment: &str) -> Map<String, Value> {
    let stripped = fragment.strip_prefix('#').unwrap_or(fragment);
    let mut map = Map::new();
    for segment in stripped.split('#') {
        if segment.is_empty() {
            continue;
        }
        let decoded = decode_component(segment);
        if decoded.trim_start().starts_with('{') {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&decoded) {
                for (key, value) in obj {
                    map.insert(key, value);
                }
                continue;
            }
        }
        for pair in segment.split('&') {
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((key, value)) => {
                    map.insert(
                        decode_component(key),
                        Value::String(decode_component(value)),
                    );
                }
                None => {
                    map.insert(decode_component(pair), Value::String(String::new()));
                }
            }
        }
    }
    map
}

/// Serialize one key/value map as a fragment segment: query form for
/// scalar-only maps, URL-encoded sorted-key JSON otherwise. Keys sort in
/// both forms.
pub fn serialize_segment(map: &Map<String, Value>) -> String {
    let scalar_only = map.values().all(|v| !v.is_array() && !v.is_object());
    if scalar_only {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|k| format!("{}={}", encode_component(k), encode_component(&display_value(&map[k]))))
            .collect::<Vec<_>>()
            .join("&")
    } else {
        encode_component(&stable_stringify(&Value::Object(map.clone())))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNCHRONIZER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct UrlSync {
    substrate: Rc<Substrate>,
    host: Rc<dyn UrlHost>,
}

impl UrlSync {
    pub fn new(substrate: Rc<Substrate>, host: Rc<dyn UrlHost>) -> Rc<Self> {
        Rc::new(UrlSync { substrate, host })
    }

    /// Fragment → namespace: the whole `url` namespace is overwritten, never
    /// partially observed.
    pub fn apply_inbound(&self) {
        let map = parse_fragment(&self.host.read_fragment());
        self.substrate
            .write(&Handle::root(URL_NAMESPACE), Value::Object(map));
    }

    /// Subscribe the outbound sync to `url`-namespace batches; each batch
    /// schedules one microtask (the debounce).
    pub fn subscribe_outbound(self: &Rc<Self>) {
        let weak: Weak<UrlSync> = Rc::downgrade(self);
        let substrate = Rc::downgrade(&self.substrate);
        self.substrate.subscribe(
            URL_NAMESPACE,
            Rc::new(move || {
                let (Some(sync), Some(substrate)) = (weak.upgrade(), substrate.upgrade()) else {
                    return;
                };
                substrate.schedule(Box::new(move || sync.sync_outbound()));
            }),
        );
    }

    /// Namespace → fragment: union the annotation key lists per kind, filter
    /// the namespace, serialize, write if different.
    pub fn sync_outbound(&self) {
        let mut included: BTreeSet<String> = BTreeSet::new();
        let mut transient: BTreeSet<String> = BTreeSet::new();
        for tree in self.substrate.mounted_trees() {
            for node in find_by_tag(&tree, "w-url") {
                for (prop, set) in [
                    ("data-included", &mut included),
                    ("data-transient", &mut transient),
                ] {
                    if let Some(Value::String(list)) = node.props.get(prop) {
                        for key in list.split(',') {
                            let key = key.trim();
                            if !key.is_empty() {
                                set.insert(key.to_string());
                            }
                        }
                    }
                }
            }
        }

        let root = self.substrate.read(&Handle::root(URL_NAMESPACE));
        let empty = Map::new();
        let current = root.as_object().unwrap_or(&empty);

        let mut segments = Vec::new();
        for keys in [&included, &transient] {
            if keys.is_empty() {
                continue;
            }
            let filtered: Map<String, Value> = current
                .iter()
                .filter(|(k, _)| keys.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if filtered.is_empty() {
                continue;
            }
            segments.push(serialize_segment(&filtered));
        }

        let fragment = if segments.is_empty() {
            String::new()
        } else {
            format!("#{}", segments.join("#"))
        };
        if fragment != self.host.read_fragment() {
            self.host.write_fragment(&fragment);
        }
    }
}
