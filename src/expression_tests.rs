#[cfg(test)]
mod tests {
    use crate::compile::{rewrite_handles, Callable, CompileStrategy, ExprCompiler, Segment};
    use crate::error::{ERR_NAME_COLLISION, ERR_PURE_MUTATION, ERR_UNKNOWN_IDENT};
    use crate::eval::{EvalCtx, Slot};
    use crate::handle::{Handle, Mode};
    use crate::scope::Scope;
    use crate::substrate::Substrate;
    use crate::RuntimeError;
    use serde_json::{json, Value};
    use std::rc::Rc;

    fn scope_with_global() -> Rc<Scope> {
        let scope = Scope::new();
        scope
            .bind_handle("Global", Handle::root("global"))
            .unwrap();
        scope
    }

    #[test]
    fn test_cache_compiles_once_per_signature() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = scope_with_global();
        let flat = scope.flatten();

        compiler.evaluate("1 + 1", &flat, Mode::Pure, &substrate).unwrap();
        compiler.evaluate("1 + 1", &flat, Mode::Pure, &substrate).unwrap();
        assert_eq!(compiler.miss_count(), 1);
        assert_eq!(compiler.cache_size(), 1);

        // A different handle signature compiles separately.
        let wider = scope.fork();
        wider.bind_handle("Extra", Handle::root("global")).unwrap();
        compiler
            .evaluate("1 + 1", &wider.flatten(), Mode::Pure, &substrate)
            .unwrap();
        assert_eq!(compiler.miss_count(), 2);
    }

    #[test]
    fn test_values_do_not_widen_cache_key() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();

        let a = Scope::new();
        a.bind_value("$n", json!(1)).unwrap();
        let b = Scope::new();
        b.bind_value("$n", json!(10)).unwrap();

        let first = compiler
            .evaluate("$n + 1", &a.flatten(), Mode::Pure, &substrate)
            .unwrap();
        let second = compiler
            .evaluate("$n + 1", &b.flatten(), Mode::Pure, &substrate)
            .unwrap();
        assert_eq!(first, json!(2));
        assert_eq!(second, json!(11));
        assert_eq!(compiler.miss_count(), 1);
    }

    #[test]
    fn test_rewrite_only_visible_aliases() {
        let scope = scope_with_global();
        let flat = scope.flatten();
        assert_eq!(
            rewrite_handles("@Global.x + @Other.y", &flat),
            "__H_Global.x + @Other.y"
        );
        // Inside string literals nothing rewrites.
        assert_eq!(rewrite_handles("'@Global.x'", &flat), "'@Global.x'");
    }

    #[test]
    fn test_effect_write_then_pure_read() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = scope_with_global();
        let flat = scope.flatten();

        compiler
            .evaluate("@Global.x = 5", &flat, Mode::Effect, &substrate)
            .unwrap();
        let read = compiler
            .evaluate("@Global.x", &flat, Mode::Pure, &substrate)
            .unwrap();
        assert_eq!(read, json!(5));
    }

    #[test]
    fn test_pure_mutation_rejected() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = scope_with_global();
        let flat = scope.flatten();

        let err = compiler
            .evaluate("@Global.x = 1", &flat, Mode::Pure, &substrate)
            .unwrap_err();
        assert!(err.is(ERR_PURE_MUTATION));
        assert_eq!(substrate.read(&Handle::root("global").join("x")), Value::Null);
    }

    #[test]
    fn test_null_safe_handle_chaining() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = scope_with_global();
        let flat = scope.flatten();

        let value = compiler
            .evaluate("@Global.a.b.c", &flat, Mode::Pure, &substrate)
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_case_insensitive_identifiers() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = scope_with_global();
        scope.bind_value("$count", json!(2)).unwrap();
        substrate.write(&Handle::root("global").join("x"), json!(7));
        let flat = scope.flatten();

        assert_eq!(
            compiler.evaluate("$COUNT + 1", &flat, Mode::Pure, &substrate).unwrap(),
            json!(3)
        );
        assert_eq!(
            compiler.evaluate("@global.x", &flat, Mode::Pure, &substrate).unwrap(),
            json!(7)
        );
        assert_eq!(
            compiler.evaluate("@GLOBAL.x", &flat, Mode::Pure, &substrate).unwrap(),
            json!(7)
        );
    }

    #[test]
    fn test_first_that_compiles_interpolation() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = Scope::new();
        let flat = scope.flatten();

        // Balanced-brace-tolerant: the inner `}` of the object literal does
        // not end the expression.
        let parsed = compiler.parse_interpolation("x { { a: 1 } } y", &flat);
        assert_eq!(parsed.segments.len(), 3);
        assert_eq!(parsed.segments[1], Segment::Expr(" { a: 1 } ".to_string()));
        assert!(!parsed.lone);

        // Unbalanced `}` inside a string literal.
        let parsed = compiler.parse_interpolation("{ 'a}b' }", &flat);
        assert!(parsed.lone);
        assert_eq!(
            compiler.interpolate_value("{ 'a}b' }", &flat, &substrate).unwrap(),
            json!("a}b")
        );

        // A brace with no compiling candidate is a literal.
        let parsed = compiler.parse_interpolation("a { b", &flat);
        assert_eq!(parsed.segments, vec![Segment::Literal("a { b".to_string())]);
    }

    #[test]
    fn test_interpolation_parse_is_cached() {
        let compiler = ExprCompiler::new();
        let scope = Scope::new();
        let flat = scope.flatten();
        let first = compiler.parse_interpolation("n={ 1 + 1 }", &flat);
        let second = compiler.parse_interpolation("n={ 1 + 1 }", &flat);
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_interpolate_text_captures_errors() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = Scope::new();
        let flat = scope.flatten();

        let out = compiler.interpolate_text("before { $nope } after", &flat, &substrate);
        assert!(out.starts_with("before [Error:"));
        assert!(out.ends_with(" after"));
    }

    #[test]
    fn test_interpolate_value_preserves_types() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = Scope::new();
        let flat = scope.flatten();

        assert_eq!(
            compiler.interpolate_value("{ true }", &flat, &substrate).unwrap(),
            json!(true)
        );
        assert_eq!(
            compiler.interpolate_value("{ [1, 2] }", &flat, &substrate).unwrap(),
            json!([1, 2])
        );
        assert_eq!(
            compiler.interpolate_value("{ null }", &flat, &substrate).unwrap(),
            Value::Null
        );
        assert_eq!(
            compiler.interpolate_value("n={ 1 }", &flat, &substrate).unwrap(),
            json!("n=1")
        );
    }

    #[test]
    fn test_imports_are_case_sensitive_and_callable() {
        let substrate = Substrate::new();
        substrate.register_external(
            "upper",
            Rc::new(|args: &[Value]| {
                Ok(Value::String(
                    args.first()
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_uppercase(),
                ))
            }),
        );
        let compiler = ExprCompiler::new();
        let scope = Scope::new();
        scope.add_import("upper");
        let flat = scope.flatten();

        assert_eq!(
            compiler.evaluate("upper('hi')", &flat, Mode::Pure, &substrate).unwrap(),
            json!("HI")
        );
        let err = compiler
            .evaluate("UPPER('hi')", &flat, Mode::Pure, &substrate)
            .unwrap_err();
        assert!(err.is(ERR_UNKNOWN_IDENT));
    }

    #[test]
    fn test_unknown_identifier_is_an_error() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = Scope::new();
        let err = compiler
            .evaluate("missing", &scope.flatten(), Mode::Pure, &substrate)
            .unwrap_err();
        assert!(err.is(ERR_UNKNOWN_IDENT));
    }

    #[test]
    fn test_handle_alias_collision_in_frame() {
        let scope = Scope::new();
        scope.bind_handle("Data", Handle::root("global")).unwrap();
        let err = scope.bind_handle("data", Handle::root("url")).unwrap_err();
        assert!(err.is(ERR_NAME_COLLISION));
    }

    struct ConstStrategy;
    struct ConstCallable;

    impl Callable for ConstCallable {
        fn call(&self, _ctx: &EvalCtx) -> Result<Slot, RuntimeError> {
            Ok(Slot::Val(json!(42)))
        }
    }

    impl CompileStrategy for ConstStrategy {
        fn compile(
            &self,
            _params: &[String],
            _body: &str,
        ) -> Result<Rc<dyn Callable>, RuntimeError> {
            Ok(Rc::new(ConstCallable))
        }
    }

    #[test]
    fn test_strategy_is_pluggable() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        compiler.set_strategy(Rc::new(ConstStrategy));
        let scope = Scope::new();
        let value = compiler
            .evaluate("anything goes", &scope.flatten(), Mode::Pure, &substrate)
            .unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_debug_reset_drops_entries() {
        let substrate = Substrate::new();
        let compiler = ExprCompiler::new();
        let scope = Scope::new();
        let flat = scope.flatten();
        compiler.evaluate("1", &flat, Mode::Pure, &substrate).unwrap();
        assert_eq!(compiler.cache_size(), 1);
        compiler.reset();
        assert_eq!(compiler.cache_size(), 0);
        assert_eq!(compiler.miss_count(), 0);
    }
}
