#[cfg(test)]
mod tests {
    use crate::bootstrap::boot_in_memory;
    use crate::vdom::{find_by_tag, VNode};
    use serde_json::{json, Value};

    fn fire(tree: &[VNode], tag: &str, index: usize, event: &str, payload: Value) {
        let elements = find_by_tag(tree, tag);
        let handler = elements[index]
            .events
            .get(event)
            .unwrap_or_else(|| panic!("no '{}' handler on <{}>[{}]", event, tag, index));
        handler(&payload);
    }

    fn texts(tree: &[VNode], tag: &str) -> Vec<String> {
        find_by_tag(tree, tag)
            .iter()
            .map(|el| {
                el.children
                    .iter()
                    .map(|c| c.text_content())
                    .collect::<String>()
            })
            .collect()
    }

    #[test]
    fn test_sid_stable_under_neighbor_change() {
        let app = boot_in_memory(
            r#"<weft-app><div>A</div><when test="{@Global.show}"><p>B</p></when><span>C</span></weft-app>"#,
            "",
        )
        .unwrap();

        let before = app.tree();
        let div_sid = find_by_tag(&before, "div")[0].sid.clone();
        let span_sid = find_by_tag(&before, "span")[0].sid.clone();
        assert!(find_by_tag(&before, "p").is_empty());

        app.write("global", "show", json!(true));
        app.flush();

        let after = app.tree();
        assert_eq!(find_by_tag(&after, "div")[0].sid, div_sid);
        assert_eq!(find_by_tag(&after, "span")[0].sid, span_sid);
        assert_eq!(find_by_tag(&after, "p").len(), 1);
    }

    #[test]
    fn test_sid_stable_under_row_count_change() {
        let app = boot_in_memory(
            r#"<weft-app><div>A</div><loop each="$x of {@Global.xs} marked by {$x}"><p>{$x}</p></loop><span>C</span></weft-app>"#,
            "",
        )
        .unwrap();

        let span_sid = find_by_tag(&app.tree(), "span")[0].sid.clone();
        app.write("global", "xs", json!([1, 2, 3]));
        app.flush();
        assert_eq!(find_by_tag(&app.tree(), "p").len(), 3);
        assert_eq!(find_by_tag(&app.tree(), "span")[0].sid, span_sid);
    }

    #[test]
    fn test_conditional_chain_selects_first_truthy() {
        let app = boot_in_memory(
            r#"<weft-app><when test="{@Global.n == 1}"><i>one</i></when><else test="{@Global.n == 2}"><i>two</i></else><else><i>other</i></else></weft-app>"#,
            "",
        )
        .unwrap();

        assert_eq!(texts(&app.tree(), "i"), vec!["other"]);

        app.write("global", "n", json!(1));
        app.flush();
        assert_eq!(texts(&app.tree(), "i"), vec!["one"]);

        app.write("global", "n", json!(2));
        app.flush();
        assert_eq!(texts(&app.tree(), "i"), vec!["two"]);
    }

    #[test]
    fn test_loop_rows_roles_and_empty_else() {
        let app = boot_in_memory(
            r#"<weft-app><loop each="$u, $i as index of {@Global.users} marked by {$u.id}"><li>{$i}:{$u.name}</li></loop><else><p>none</p></else></weft-app>"#,
            "",
        )
        .unwrap();

        assert_eq!(texts(&app.tree(), "p"), vec!["none"]);

        app.write(
            "global",
            "users",
            json!([{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]),
        );
        app.flush();
        assert_eq!(texts(&app.tree(), "li"), vec!["0:A", "1:B"]);
        assert!(find_by_tag(&app.tree(), "p").is_empty());
    }

    #[test]
    fn test_loop_row_sid_follows_marker_not_position() {
        let app = boot_in_memory(
            r#"<weft-app><loop each="$u of {@Global.users} marked by {$u.id}"><li>{$u.name}</li></loop></weft-app>"#,
            "",
        )
        .unwrap();

        app.write("global", "users", json!([{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]));
        app.flush();
        let tree = app.tree();
        let lis = find_by_tag(&tree, "li");
        let sid_of_two = lis[1].sid.clone();

        app.write("global", "users", json!([{"id": 2, "name": "B"}, {"id": 1, "name": "A"}]));
        app.flush();
        let tree = app.tree();
        let lis = find_by_tag(&tree, "li");
        assert_eq!(lis[0].sid, sid_of_two);
    }

    #[test]
    fn test_duplicate_marker_is_a_boundary_error() {
        let app = boot_in_memory(
            r#"<weft-setup init="{ { users: [1, 2] } }"></weft-setup><weft-app><loop each="$u of {@Global.users} marked by {1}"><p>x</p></loop></weft-app>"#,
            "",
        )
        .unwrap();

        let tree = app.tree();
        let errors = find_by_tag(&tree, "w-error");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].props.get("data-code"),
            Some(&json!("W-ERR-MARK-001"))
        );
    }

    #[test]
    fn test_object_iteration_in_insertion_order() {
        let app = boot_in_memory(
            r#"<weft-setup init="{ { obj: { b: 1, a: 2 } } }"></weft-setup><weft-app><loop each="$v, $k as field of {@Global.obj} marked by field"><b>{$k}={$v}</b></loop></weft-app>"#,
            "",
        )
        .unwrap();

        assert_eq!(texts(&app.tree(), "b"), vec!["b=1", "a=2"]);
    }

    #[test]
    fn test_marker_keyword_kind_mismatch() {
        let app = boot_in_memory(
            r#"<weft-setup init="{ { xs: [1] } }"></weft-setup><weft-app><loop each="$x of {@Global.xs} marked by field"><p>x</p></loop></weft-app>"#,
            "",
        )
        .unwrap();
        let tree = app.tree();
        let errors = find_by_tag(&tree, "w-error");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].props.get("data-code"),
            Some(&json!("W-ERR-SHAPE-001"))
        );
    }

    #[test]
    fn test_boolean_and_null_attribute_handling() {
        let app = boot_in_memory(
            r#"<weft-app><textarea disabled="{@Global.on}"></textarea><p title="{@Global.missing}">t</p><span data-x="v={@Global.missing}">s</span></weft-app>"#,
            "",
        )
        .unwrap();

        let tree = app.tree();
        assert!(find_by_tag(&tree, "textarea")[0].props.get("disabled").is_none());
        assert!(find_by_tag(&tree, "p")[0].props.get("title").is_none());
        // Partial interpolations always emit.
        assert_eq!(
            find_by_tag(&tree, "span")[0].props.get("data-x"),
            Some(&json!("v="))
        );

        app.write("global", "on", json!(true));
        app.flush();
        assert_eq!(
            find_by_tag(&app.tree(), "textarea")[0].props.get("disabled"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_def_bindings_on_root() {
        let app = boot_in_memory(
            r#"<weft-app def="$n := {2 + 3}, @G := @Global.deep"><p>{$n}</p><button onclick="@{ @G.x = $n }">go</button></weft-app>"#,
            "",
        )
        .unwrap();

        assert_eq!(texts(&app.tree(), "p"), vec!["5"]);
        fire(&app.tree(), "button", 0, "click", json!({}));
        app.flush();
        assert_eq!(app.read("global", "deep.x"), json!(5));
    }

    #[test]
    fn test_effect_handler_rerenders() {
        let app = boot_in_memory(
            r#"<weft-app><button onclick="@{ @Global.n = 1 + 2 }">go</button><p>{@Global.n}</p></weft-app>"#,
            "",
        )
        .unwrap();

        assert_eq!(texts(&app.tree(), "p"), vec![""]);
        fire(&app.tree(), "button", 0, "click", json!({}));
        app.flush();
        assert_eq!(texts(&app.tree(), "p"), vec!["3"]);
    }

    #[test]
    fn test_event_binding_in_handler() {
        let app = boot_in_memory(
            r#"<weft-app><button onclick="@{ @Global.got = $Event.detail }">go</button></weft-app>"#,
            "",
        )
        .unwrap();

        fire(&app.tree(), "button", 0, "click", json!({"detail": "d1"}));
        app.flush();
        assert_eq!(app.read("global", "got"), json!("d1"));
    }

    #[test]
    fn test_url_tag_emits_annotation_node() {
        let app = boot_in_memory(
            r#"<weft-app><weft-url include="tab, count" transient="peek"><p>x</p></weft-url></weft-app>"#,
            "",
        )
        .unwrap();

        let tree = app.tree();
        let nodes = find_by_tag(&tree, "w-url");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].props.get("data-included"), Some(&json!("tab,count")));
        assert_eq!(nodes[0].props.get("data-transient"), Some(&json!("peek")));
        assert_eq!(find_by_tag(&tree, "p").len(), 1);
    }

    #[test]
    fn test_form_binding_round_trip() {
        let app = boot_in_memory(
            r#"<weft-app><form><input name="note"></form></weft-app>"#,
            "",
        )
        .unwrap();

        let tree = app.tree();
        let form_sid = find_by_tag(&tree, "form")[0].sid.clone();
        assert_eq!(find_by_tag(&tree, "input")[0].props.get("value"), Some(&json!("")));

        fire(&tree, "input", 0, "input", json!({"value": "x"}));
        app.flush();
        let ns = format!("local:{}", form_sid);
        assert_eq!(app.read(&ns, "note"), json!("x"));
        assert_eq!(
            find_by_tag(&app.tree(), "input")[0].props.get("value"),
            Some(&json!("x"))
        );

        app.write(&ns, "note", json!("y"));
        app.flush();
        assert_eq!(
            find_by_tag(&app.tree(), "input")[0].props.get("value"),
            Some(&json!("y"))
        );
    }

    #[test]
    fn test_form_field_type_semantics() {
        let app = boot_in_memory(
            r#"<weft-app><form><input type="checkbox" name="on"><input type="radio" name="pick" value="a"><input type="radio" name="pick" value="b"><select multiple name="tags"></select></form></weft-app>"#,
            "",
        )
        .unwrap();

        let tree = app.tree();
        let form_sid = find_by_tag(&tree, "form")[0].sid.clone();
        let ns = format!("local:{}", form_sid);

        fire(&tree, "input", 0, "change", json!({"checked": true}));
        fire(&tree, "input", 2, "change", json!({"checked": true}));
        fire(&tree, "select", 0, "change", json!({"selected": ["x", "y"]}));
        app.flush();

        assert_eq!(app.read(&ns, "on"), json!(true));
        assert_eq!(app.read(&ns, "pick"), json!("b"));
        assert_eq!(app.read(&ns, "tags"), json!(["x", "y"]));

        // The checked radio is the one whose value matches state.
        let tree = app.tree();
        let radios = find_by_tag(&tree, "input");
        assert_eq!(radios[1].props.get("checked"), Some(&json!(false)));
        assert_eq!(radios[2].props.get("checked"), Some(&json!(true)));
    }

    #[test]
    fn test_form_submit_is_intercepted() {
        let app = boot_in_memory(
            r#"<weft-app><form onsubmit="@{ @Global.sent = true }"></form><form></form></weft-app>"#,
            "",
        )
        .unwrap();

        let tree = app.tree();
        let forms = find_by_tag(&tree, "form");
        // Both forms carry a submit wrapper, author handler or not.
        assert!(forms[0].events.contains_key("submit"));
        assert!(forms[1].events.contains_key("submit"));

        fire(&tree, "form", 0, "submit", json!({}));
        app.flush();
        assert_eq!(app.read("global", "sent"), json!(true));
    }

    #[test]
    fn test_clear_on_unmount_drops_local_state() {
        let app = boot_in_memory(
            r#"<weft-setup init="{ { show: true } }"></weft-setup><weft-app><when test="{@Global.show}"><div init="{ { n: 1 } }" def="@Local as local" clear-on-unmount="true"><p>{@Local.n}</p></div></when></weft-app>"#,
            "",
        )
        .unwrap();

        let tree = app.tree();
        assert_eq!(texts(&tree, "p"), vec!["1"]);
        let div_sid = find_by_tag(&tree, "div")[0].sid.clone();
        let ns = format!("local:{}", div_sid);
        assert!(app.substrate.has_namespace(&ns));

        app.write("global", "show", json!(false));
        app.flush();
        assert!(!app.substrate.has_namespace(&ns));
    }

    #[test]
    fn test_unknown_component_is_a_boundary_error() {
        let app = boot_in_memory(
            r#"<weft-app><ghost></ghost><p>after</p></weft-app>"#,
            "",
        )
        .unwrap();
        // A name registered with the substrate but lacking a template is an
        // undefined component at its use-site.
        app.substrate.register_component("ghost");
        app.write("global", "poke", json!(1));
        app.flush();

        let tree = app.tree();
        let errors = find_by_tag(&tree, "w-error");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].props.get("data-code"),
            Some(&json!("W-ERR-TMPL-001"))
        );
    }

    #[test]
    fn test_multiple_roots_share_the_substrate() {
        let app = boot_in_memory(
            r#"<weft-app id="a"><button onclick="@{ @Global.n = 7 }">go</button></weft-app>
               <weft-app id="b"><p>{@Global.n}</p></weft-app>"#,
            "",
        )
        .unwrap();

        let tree_a = app.tree_of("a").unwrap();
        fire(&tree_a, "button", 0, "click", json!({}));
        app.flush();

        let tree_b = app.tree_of("b").unwrap();
        assert_eq!(texts(&tree_b, "p"), vec!["7"]);
    }

    #[test]
    fn test_component_use_site_honors_test() {
        let app = boot_in_memory(
            r#"<weft-app><card:template params="$title"><h2>{$title}</h2></card:template><card title="Hi" test="{@Global.show}"></card><p>after</p></weft-app>"#,
            "",
        )
        .unwrap();

        assert!(find_by_tag(&app.tree(), "h2").is_empty());
        assert_eq!(texts(&app.tree(), "p"), vec!["after"]);

        app.write("global", "show", json!(true));
        app.flush();
        assert_eq!(texts(&app.tree(), "h2"), vec!["Hi"]);
    }

    #[test]
    fn test_component_passthrough_attributes() {
        let app = boot_in_memory(
            r#"<weft-app><card:template params="$title"><h2>{$title}</h2></card:template><card title="Hi" class="big" data-k="v"></card></weft-app>"#,
            "",
        )
        .unwrap();

        let tree = app.tree();
        let component = tree
            .iter()
            .find_map(|n| match n {
                crate::vdom::VNode::Component(c) => Some(c),
                _ => None,
            })
            .expect("component node");
        assert_eq!(component.name, "card");
        assert_eq!(component.params.get("$title"), Some(&json!("Hi")));
        assert_eq!(component.passthrough.get("class"), Some(&json!("big")));
        assert_eq!(component.passthrough.get("data-k"), Some(&json!("v")));
    }

    #[test]
    fn test_init_runs_once_per_sid() {
        let app = boot_in_memory(
            r#"<weft-app><div init="{ { n: 1 } }" def="@Local as local"><button onclick="@{ @Local.n = @Local.n + 1 }">inc</button><p>{@Local.n}</p></div></weft-app>"#,
            "",
        )
        .unwrap();

        assert_eq!(texts(&app.tree(), "p"), vec!["1"]);
        fire(&app.tree(), "button", 0, "click", json!({}));
        app.flush();
        // The rerender must not re-seed the namespace.
        assert_eq!(texts(&app.tree(), "p"), vec!["2"]);
    }
}
