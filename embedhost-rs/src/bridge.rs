//! Typed attribute access on script-side objects.
//!
//! Every accessor takes an optional object so call sites can chain lookups
//! without checking each step.  Failures are silent: the generic accessors
//! return `None`/`false`, the typed ones return the caller's sentinel.  A
//! sentinel equal to a legitimate value is ambiguous; use [`has_attr`]
//! first when that matters.
//!
//! | Function           | Accepts            | On any failure |
//! |--------------------|--------------------|----------------|
//! | [`get_long_attr`]  | integers only      | `default`      |
//! | [`get_double_attr`]| floats only        | `default`      |
//! | [`get_string_attr`]| strings only       | `None`         |

use crate::runtime::{GuestObject, HostValue};

/// Attribute `name` of `obj`.
pub fn get_attr<O: GuestObject>(obj: Option<&O>, name: &str) -> Option<O> {
    if name.is_empty() {
        return None;
    }
    obj?.get_attr(name)
}

/// Set attribute `name` of `obj`; `false` on any failure.
pub fn set_attr<O: GuestObject>(obj: Option<&O>, name: &str, value: impl Into<HostValue>) -> bool {
    match obj {
        Some(o) if !name.is_empty() => o.set_attr(name, value.into()),
        _ => false,
    }
}

pub fn has_attr<O: GuestObject>(obj: Option<&O>, name: &str) -> bool {
    !name.is_empty() && obj.is_some_and(|o| o.has_attr(name))
}

/// Integer attribute `name`, or `default` if absent or not an integer.
pub fn get_long_attr<O: GuestObject>(obj: Option<&O>, name: &str, default: i64) -> i64 {
    get_attr(obj, name)
        .and_then(|v| v.as_long())
        .unwrap_or(default)
}

/// Float attribute `name`, or `default` if absent or not a float.
pub fn get_double_attr<O: GuestObject>(obj: Option<&O>, name: &str, default: f64) -> f64 {
    get_attr(obj, name)
        .and_then(|v| v.as_double())
        .unwrap_or(default)
}

/// An owned copy of string attribute `name`.
pub fn get_string_attr<O: GuestObject>(obj: Option<&O>, name: &str) -> Option<String> {
    get_attr(obj, name)?.as_text()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, feature = "lua"))]
mod tests {
    use super::*;
    use crate::lua::{LuaObject, LuaRuntime};
    use crate::namespace::Namespace;
    use crate::runtime::Runtime;
    use crate::script::ScriptUnit;

    fn object(rt: &LuaRuntime, src: &str) -> LuaObject {
        let ns = Namespace::create(rt).unwrap();
        ScriptUnit::from_buffer(src)
            .execute(rt, &ns)
            .unwrap()
            .expect("script returns an object")
    }

    const RECORD: &str = "return { longField = 42, floatField = 2.5, stringField = 'héllo wörld' }";

    #[test]
    fn typed_reads() {
        let rt = LuaRuntime::boot("bridge-test").unwrap();
        let obj = object(&rt, RECORD);
        assert_eq!(get_long_attr(Some(&obj), "longField", 0), 42);
        assert_eq!(get_double_attr(Some(&obj), "floatField", 0.0), 2.5);
        assert_eq!(get_string_attr(Some(&obj), "stringField").as_deref(), Some("héllo wörld"));
    }

    #[test]
    fn type_mismatch_returns_sentinel() {
        let rt = LuaRuntime::boot("bridge-test").unwrap();
        let obj = object(&rt, RECORD);
        assert_eq!(get_long_attr(Some(&obj), "stringField", 0), 0);
        assert_eq!(get_long_attr(Some(&obj), "floatField", -1), -1);
        assert_eq!(get_double_attr(Some(&obj), "longField", 0.0), 0.0);
        assert_eq!(get_string_attr(Some(&obj), "longField"), None);
    }

    #[test]
    fn missing_object_or_name() {
        let rt = LuaRuntime::boot("bridge-test").unwrap();
        let obj = object(&rt, RECORD);
        assert_eq!(get_long_attr::<LuaObject>(None, "longField", 0), 0);
        assert_eq!(get_long_attr(Some(&obj), "", 7), 7);
        assert_eq!(get_long_attr(Some(&obj), "noSuchField", 0), 0);
        assert!(!has_attr(Some(&obj), "noSuchField"));
        assert!(has_attr(Some(&obj), "longField"));
        assert!(!has_attr::<LuaObject>(None, "longField"));
    }

    #[test]
    fn set_then_get() {
        let rt = LuaRuntime::boot("bridge-test").unwrap();
        let obj = object(&rt, "return {}");
        assert!(set_attr(Some(&obj), "count", 3i64));
        assert!(set_attr(Some(&obj), "label", "x"));
        assert_eq!(get_long_attr(Some(&obj), "count", 0), 3);
        assert_eq!(get_string_attr(Some(&obj), "label").as_deref(), Some("x"));
        assert!(!set_attr::<LuaObject>(None, "count", 1i64));
    }

    #[test]
    fn scalars_have_no_attributes() {
        let rt = LuaRuntime::boot("bridge-test").unwrap();
        let obj = object(&rt, "return 5");
        assert!(get_attr(Some(&obj), "anything").is_none());
        assert!(!set_attr(Some(&obj), "anything", 1i64));
    }
}
