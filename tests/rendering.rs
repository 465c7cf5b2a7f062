//! End-to-end rendering through the public API

use octofhir_templates::{
    Environment, EnvironmentOptions, Kwargs, MapLoader, Namespace, Syntax, Template,
    TemplateError, UndefinedPolicy, Value,
};
use octofhir_templates::runtime::Vm;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn render(source: &str, vars: Namespace) -> String {
    Environment::new()
        .from_string(source, None)
        .unwrap()
        .render(vars)
        .unwrap()
}

fn with_templates(templates: &[(&str, &str)]) -> Arc<Environment> {
    let loader = templates
        .iter()
        .fold(MapLoader::new(), |loader, (name, source)| loader.with(*name, *source));
    let env = Environment::new();
    env.set_loader(loader).unwrap();
    env
}

#[test]
fn hello_world() {
    let env = Environment::new();
    let template = env.from_string("Hello {{ name }}!", None).unwrap();
    assert_eq!(template.render([("name", "World")]).unwrap(), "Hello World!");
}

#[test]
fn template_constructed_from_source() {
    let template = Template::new("Hello {{ name }}!").unwrap();
    assert!(template.environment().is_shared());
    assert_eq!(template.render([("name", "World")]).unwrap(), "Hello World!");
}

#[test]
fn module_exports_macro_and_body() {
    let template = Template::new("{% macro foo() %}42{% endmacro %}23").unwrap();
    let module = template.module().unwrap();
    assert_eq!(module.body(), "23");
    let foo = module.get("foo").expect("foo is exported");
    assert_eq!(foo.call(&[], &Kwargs::new()).unwrap().render().unwrap(), "42");
}

#[test]
fn caller_variables_are_not_mutated() {
    let vars = Namespace::from([("x", 1)]);
    let out = render("{% set x = x + 1 %}{{ x }}", vars.clone());
    assert_eq!(out, "2");
    assert_eq!(vars.get("x"), Some(Value::from(1)));
    assert_eq!(vars.len(), 1);
}

#[test]
fn shared_context_reads_caller_namespace() {
    let template = Environment::new().from_string("{{ x }}", None).unwrap();
    let vars = Namespace::from([("x", 1)]);

    let copied = template.new_context(vars.clone(), false);
    let shared = template.new_context(vars.clone(), true);
    vars.insert("x", 2);

    let run = |context| {
        let mut vm = Vm::new(context, Arc::clone(template.code()));
        let mut out = String::new();
        while let Some(chunk) = vm.next_chunk() {
            out.push_str(&chunk.unwrap());
        }
        out
    };
    assert_eq!(run(copied), "1");
    assert_eq!(run(shared), "2");
}

#[test]
fn debug_lines_map_back_to_source() {
    let env = Environment::new();
    let template = env
        .from_string("first\n\n{{ a }}\n\n{{ b }}", None)
        .unwrap();
    let info = template.debug_info().to_vec();
    assert!(!info.is_empty());
    for (line, index) in info {
        assert_eq!(template.get_corresponding_lineno(index), line);
    }
    assert_eq!(template.get_corresponding_lineno(usize::MAX), 5);
}

#[test]
fn streaming_with_buffering() {
    let env = Environment::new();
    let template = env
        .from_string("{% for c in 'abcdefghij' %}{{ c }}{% endfor %}", None)
        .unwrap();
    let mut stream = template.stream(Namespace::new());
    stream.enable_buffering(5).unwrap();
    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect();
    assert_eq!(chunks, vec!["abcde", "fghij"]);
}

#[test]
fn resolver_never_fails_for_missing_lookups() {
    let env = Environment::new();
    let obj = Value::from(42);
    assert!(env.getattr(&obj, "missing").is_undefined());
    assert!(env.getitem(&obj, &Value::from("missing")).is_undefined());
    assert_eq!(
        render(
            "[{{ x.y.z }}][{{ n.missing }}][{{ [1][7] }}]",
            Namespace::from([("n", 5)])
        ),
        "[][][]"
    );
}

#[test]
fn strict_undefined_fails_with_location() {
    let env = Environment::with_options(EnvironmentOptions {
        undefined: UndefinedPolicy::Strict,
        ..EnvironmentOptions::default()
    })
    .unwrap();
    let template = env.from_string("ok\n{{ missing }}", None).unwrap();
    let err = template.render(Namespace::new()).unwrap_err();
    assert!(matches!(err, TemplateError::Undefined { .. }), "{err}");
    assert_eq!(err.line(), Some(2));
    assert!(err.to_string().contains("missing"));

    let defined = env
        .from_string("{{ missing is defined }}|{{ missing|default('d') }}", None)
        .unwrap();
    assert_eq!(defined.render(Namespace::new()).unwrap(), "false|d");
}

#[test]
fn debug_undefined_renders_placeholder() {
    let env = Environment::with_options(EnvironmentOptions {
        undefined: UndefinedPolicy::Debug,
        ..EnvironmentOptions::default()
    })
    .unwrap();
    let template = env.from_string("[{{ user }}]", None).unwrap();
    assert_eq!(template.render(Namespace::new()).unwrap(), "[{{ user }}]");
}

#[test]
fn loops_expose_loop_record() {
    let out = render(
        "{% for x in items %}{{ loop.index }}/{{ loop.length }}{{ '' if loop.last else ',' }}{% else %}empty{% endfor %}",
        Namespace::from([("items", Value::from(vec!["a", "b", "c"]))]),
    );
    assert_eq!(out, "1/3,2/3,3/3");

    let out = render(
        "{% for x in items %}{{ x }}{% else %}empty{% endfor %}",
        Namespace::from([("items", Value::from(Vec::<Value>::new()))]),
    );
    assert_eq!(out, "empty");
}

#[test]
fn loops_unpack_pairs() {
    let out = render(
        "{% for k, v in {'b': 2, 'a': 1}|items %}{{ k }}={{ v }};{% endfor %}",
        Namespace::new(),
    );
    assert_eq!(out, "b=2;a=1;");
}

#[test]
fn loop_variables_do_not_leak() {
    let out = render(
        "{% set x = 'outer' %}{% for x in [1, 2] %}{{ x }}{% endfor %}{{ x }}",
        Namespace::new(),
    );
    assert_eq!(out, "12outer");
}

#[test]
fn macros_with_defaults_and_keywords() {
    let out = render(
        "{% macro tag(name, cls='plain') %}<{{ name }} class=\"{{ cls }}\">{% endmacro %}\
         {{ tag('a') }}{{ tag('b', cls='x') }}{{ tag(cls='y', name='c') }}",
        Namespace::new(),
    );
    assert_eq!(
        out,
        "<a class=\"plain\"><b class=\"x\"><c class=\"y\">"
    );
}

#[test]
fn macro_argument_errors() {
    let env = Environment::new();
    let template = env
        .from_string("{% macro m(a) %}{{ a }}{% endmacro %}{{ m(1, 2) }}", None)
        .unwrap();
    assert!(template.render(Namespace::new()).is_err());

    let template = env
        .from_string("{% macro m(a) %}{{ a }}{% endmacro %}{{ m(b=1) }}", None)
        .unwrap();
    assert!(template.render(Namespace::new()).is_err());
}

#[test]
fn recursive_macros_hit_depth_limit() {
    let env = Environment::new();
    let template = env
        .from_string("{% macro r() %}{{ r() }}{% endmacro %}{{ r() }}", None)
        .unwrap();
    let err = template.render(Namespace::new()).unwrap_err();
    assert!(err.to_string().contains("recursion"), "{err}");
}

#[test]
fn template_inheritance() {
    let env = with_templates(&[
        (
            "base.html",
            "<title>{% block title %}Default{% endblock %}</title>{% block body %}{% endblock %}",
        ),
        (
            "child.html",
            "{% extends 'base.html' %}{% block body %}Hi {{ name }}{% endblock %}ignored",
        ),
        (
            "grandchild.html",
            "{% extends 'child.html' %}{% block title %}Grand{% endblock %}",
        ),
    ]);
    let child = env.get_template("child.html", None, None).unwrap();
    assert_eq!(
        child.render([("name", "Ann")]).unwrap(),
        "<title>Default</title>Hi Ann"
    );
    let grandchild = env.get_template("grandchild.html", None, None).unwrap();
    assert_eq!(
        grandchild.render([("name", "Bo")]).unwrap(),
        "<title>Grand</title>Hi Bo"
    );
}

#[test]
fn includes_see_enclosing_variables() {
    let env = with_templates(&[
        (
            "page.html",
            "{% for item in items %}{% include 'item.html' %}{% endfor %}{% include 'missing.html' ignore missing %}",
        ),
        ("item.html", "[{{ item }}]"),
    ]);
    let page = env.get_template("page.html", None, None).unwrap();
    assert_eq!(
        page.render([("items", Value::from(vec![1, 2]))]).unwrap(),
        "[1][2]"
    );
}

#[test]
fn missing_include_is_an_error() {
    let env = with_templates(&[("page.html", "{% include 'missing.html' %}")]);
    let page = env.get_template("page.html", None, None).unwrap();
    assert!(matches!(
        page.render(Namespace::new()).unwrap_err(),
        TemplateError::TemplateNotFound { .. }
    ));
}

#[test]
fn imports_expose_module_exports() {
    let env = with_templates(&[
        (
            "forms.html",
            "{% set prefix = 'f-' %}{% macro input(name) %}<input id=\"{{ prefix }}{{ name }}\">{% endmacro %}",
        ),
        (
            "page.html",
            "{% import 'forms.html' as forms %}{% from 'forms.html' import input as field %}{{ forms.input('a') }}{{ field('b') }}{{ forms.prefix }}",
        ),
    ]);
    let page = env.get_template("page.html", None, None).unwrap();
    assert_eq!(
        page.render(Namespace::new()).unwrap(),
        "<input id=\"f-a\"><input id=\"f-b\">f-"
    );
}

#[test]
fn whitespace_control_and_trim_blocks() {
    assert_eq!(
        render("a  {%- if true -%}  b  {%- endif %}", Namespace::new()),
        "ab"
    );

    let env = Environment::with_options(EnvironmentOptions {
        trim_blocks: true,
        ..EnvironmentOptions::default()
    })
    .unwrap();
    let template = env
        .from_string("{% if true %}\nline\n{% endif %}\nend", None)
        .unwrap();
    assert_eq!(template.render(Namespace::new()).unwrap(), "line\nend");
}

#[test]
fn line_statements() {
    let env = Environment::with_options(EnvironmentOptions {
        syntax: Syntax {
            line_statement_prefix: Some("#".into()),
            ..Syntax::default()
        },
        ..EnvironmentOptions::default()
    })
    .unwrap();
    let template = env
        .from_string("# for x in [1, 2]\n{{ x }}\n# endfor\n", None)
        .unwrap();
    assert_eq!(template.render(Namespace::new()).unwrap(), "1\n2\n");
}

#[test]
fn expressions() {
    let cases = [
        ("{{ 7 // 2 }} {{ 7 / 2 }} {{ -7 % 3 }} {{ 2 ** 10 }}", "3 3.5 2 1024"),
        ("{{ 'a' ~ 1 ~ none }}", "a1"),
        ("{{ 1 in [1, 2] }} {{ 'x' not in 'abc' }}", "true true"),
        ("{{ 'yes' if 0 else 'no' }}", "no"),
        ("{{ not 1 == 2 and (3 > 2 or false) }}", "true"),
        ("{{ {'a': 1}['a'] }}{{ [1, 2, 3][-1] }}", "13"),
        ("{{ range(3)|join(',') }}", "0,1,2"),
        ("{{ 'hello world'|title|replace('World', 'There') }}", "Hello There"),
        ("{{ 10 is divisibleby 5 }} {{ 3 is not even }}", "true true"),
    ];
    for (source, expected) in cases {
        assert_eq!(render(source, Namespace::new()), expected, "{source}");
    }
}

#[test]
fn json_variables() {
    let vars = Namespace::from_json(serde_json::json!({
        "user": {"name": "Ann", "roles": ["admin", "dev"]}
    }))
    .unwrap();
    assert_eq!(
        render("{{ user.name }}: {{ user.roles|join(', ') }} ({{ user['roles']|length }})", vars),
        "Ann: admin, dev (2)"
    );
}

#[test]
fn syntax_errors_carry_template_name_and_line() {
    let env = with_templates(&[("broken.html", "ok\n{% if x %}\nno end")]);
    let err = env.get_template("broken.html", None, None).unwrap_err();
    assert!(matches!(err, TemplateError::Syntax { .. }), "{err}");
    let location = err.location().unwrap();
    assert_eq!(location.name.as_deref(), Some("broken.html"));
    assert!(location.line >= 2);
}

fn uncached(templates: &[(&str, &str)]) -> Arc<Environment> {
    let loader = templates
        .iter()
        .fold(MapLoader::new(), |loader, (name, source)| loader.with(*name, *source));
    Environment::with_options(EnvironmentOptions {
        cache_size: 0,
        loader: Some(Arc::new(loader)),
        ..EnvironmentOptions::default()
    })
    .unwrap()
}

fn assert_circular(err: TemplateError) {
    assert!(matches!(err, TemplateError::Evaluation { .. }), "{err}");
    assert!(err.to_string().contains("circular"), "{err}");
}

#[test]
fn self_import_fails_instead_of_hanging() {
    let env = with_templates(&[("a", "{% import 'a' as m %}x")]);
    let template = env.get_template("a", None, None).unwrap();
    assert_circular(template.render(Namespace::new()).unwrap_err());
    assert_circular(template.module().unwrap_err());
}

#[test]
fn import_cycles_fail_with_and_without_cache() {
    let templates = [
        ("a", "{% import 'b' as b %}a"),
        ("b", "{% from 'a' import thing %}b"),
    ];
    for env in [with_templates(&templates), uncached(&templates)] {
        let err = env
            .get_template("a", None, None)
            .unwrap()
            .render(Namespace::new())
            .unwrap_err();
        assert_circular(err);
    }
}

#[test]
fn repeated_imports_of_one_module_are_not_cycles() {
    let env = with_templates(&[
        ("lib", "{% macro hi() %}hi{% endmacro %}"),
        ("mid", "{% import 'lib' as lib %}{{ lib.hi() }}"),
        ("top", "{% import 'lib' as lib %}{% include 'mid' %}{{ lib.hi() }}"),
    ]);
    let top = env.get_template("top", None, None).unwrap();
    assert_eq!(top.render(Namespace::new()).unwrap(), "hihi");
}

#[test]
fn inheritance_cycles_fail_instead_of_hanging() {
    let env = with_templates(&[("a", "{% extends 'a' %}")]);
    let err = env
        .get_template("a", None, None)
        .unwrap()
        .render(Namespace::new())
        .unwrap_err();
    assert_circular(err);

    let templates = [
        ("a", "{% extends 'b' %}{% block x %}a{% endblock %}"),
        ("b", "{% extends 'a' %}{% block x %}b{% endblock %}"),
    ];
    for env in [with_templates(&templates), uncached(&templates)] {
        let err = env
            .get_template("a", None, None)
            .unwrap()
            .render(Namespace::new())
            .unwrap_err();
        assert_circular(err);
    }
}
