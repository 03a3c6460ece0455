//! Small tree-sitter helpers shared by the extractors

use tree_sitter::Node;

/// Get the text content of a node
pub fn get_text<'a>(node: &Node<'a>, source: &'a str) -> Option<&'a str> {
    node.utf8_text(source.as_bytes()).ok()
}

/// Get text from a named field in a node
pub fn get_field_text<'a>(node: &Node<'a>, field: &str, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field)
        .and_then(|n| get_text(&n, source))
}

/// 1-based line of the node start
pub fn line_of(node: &Node) -> usize {
    node.start_position().row + 1
}

/// Value of a string literal (`'x'`, `"x"`, or a template without substitutions)
pub fn string_value(node: &Node, source: &str) -> Option<String> {
    match node.kind() {
        "string" | "template_string" => {
            let mut cursor = node.walk();
            let mut value = String::new();
            for child in node.children(&mut cursor) {
                match child.kind() {
                    "string_fragment" => value.push_str(get_text(&child, source)?),
                    "escape_sequence" => value.push_str(&unescape(get_text(&child, source)?)),
                    "template_substitution" => return None,
                    _ => {}
                }
            }
            Some(value)
        }
        _ => None,
    }
}

fn unescape(seq: &str) -> String {
    match seq {
        "\\n" => "\n".into(),
        "\\t" => "\t".into(),
        "\\r" => "\r".into(),
        "\\0" => "\0".into(),
        other => other.strip_prefix('\\').unwrap_or(other).to_string(),
    }
}

/// Key of an object `pair` as a plain string (identifier, string or number key)
pub fn property_key(pair: &Node, source: &str) -> Option<String> {
    let key = pair.child_by_field_name("key")?;
    match key.kind() {
        "property_identifier" | "number" => get_text(&key, source).map(str::to_string),
        "string" => string_value(&key, source),
        _ => None,
    }
}

/// Strip wrappers that do not change the value: parentheses, `as`, `satisfies`, `!`
pub fn unwrap_expression<'a>(node: Node<'a>) -> Node<'a> {
    let mut current = node;
    loop {
        match current.kind() {
            "parenthesized_expression" | "as_expression" | "satisfies_expression"
            | "non_null_expression" => match current.named_child(0) {
                Some(inner) => current = inner,
                None => return current,
            },
            _ => return current,
        }
    }
}

/// Named children of `node`, skipping comments
pub fn named_children<'a>(node: &Node<'a>) -> Vec<Node<'a>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect()
}

/// Visit every node in the subtree, depth first, in source order
pub fn visit<'a, F: FnMut(Node<'a>)>(node: Node<'a>, f: &mut F) {
    let mut cursor = node.walk();
    loop {
        f(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() || cursor.node() == node {
                return;
            }
        }
    }
}

/// Describe the first syntax error in the tree, if any
pub fn first_error(root: &Node) -> Option<String> {
    if !root.has_error() {
        return None;
    }
    let mut found = None;
    visit(*root, &mut |n| {
        if found.is_none() && (n.is_error() || n.is_missing()) {
            let pos = n.start_position();
            found = Some(format!(
                "syntax error at line {}, column {}",
                pos.row + 1,
                pos.column + 1
            ));
        }
    });
    Some(found.unwrap_or_else(|| "syntax error".to_string()))
}
