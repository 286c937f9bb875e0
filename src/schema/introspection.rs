//! Serde model of the standard GraphQL introspection result.
//!
//! Every schema source, local or remote, is described by the same
//! [`IntrospectionSchema`] so that the stitching code never has to care
//! where a type came from.
use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

/// The introspection query sent to every source.
pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { ...FullType }
    directives {
      name
      description
      locations
      args { ...InputValue }
    }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args { ...InputValue }
    type { ...TypeRef }
    isDeprecated
    deprecationReason
  }
  inputFields { ...InputValue }
  interfaces { ...TypeRef }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes { ...TypeRef }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType { kind name }
            }
          }
        }
      }
    }
  }
}
"#;

/// Query used to read a remote schema's version.
pub const VERSION_QUERY: &str = "{ version }";

const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];
const BUILTIN_DIRECTIVES: [&str; 5] = ["include", "skip", "deprecated", "specifiedBy", "oneOf"];

/// Wrapper matching the `data` object of an introspection response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionData {
    #[serde(rename = "__schema")]
    pub schema: IntrospectionSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectionSchema {
    pub query_type: Option<NamedRef>,
    #[serde(default)]
    pub mutation_type: Option<NamedRef>,
    #[serde(default)]
    pub subscription_type: Option<NamedRef>,
    #[serde(default)]
    pub types: Vec<FullType>,
    #[serde(default)]
    pub directives: Vec<DirectiveDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullType {
    pub kind: TypeKind,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<FieldDef>>,
    #[serde(default)]
    pub input_fields: Option<Vec<InputValueDef>>,
    #[serde(default)]
    pub interfaces: Option<Vec<TypeRef>>,
    #[serde(default)]
    pub enum_values: Option<Vec<EnumValueDef>>,
    #[serde(default)]
    pub possible_types: Option<Vec<TypeRef>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub args: Vec<InputValueDef>,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub is_deprecated: bool,
    #[serde(default)]
    pub deprecation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputValueDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumValueDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_deprecated: bool,
    #[serde(default)]
    pub deprecation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub args: Vec<InputValueDef>,
}

/// A possibly wrapped reference to a named type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeRef {
    pub kind: TypeKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    pub fn named(kind: TypeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: Some(name.into()),
            of_type: None,
        }
    }

    pub fn non_null(inner: TypeRef) -> Self {
        Self {
            kind: TypeKind::NonNull,
            name: None,
            of_type: Some(Box::new(inner)),
        }
    }

    pub fn list(inner: TypeRef) -> Self {
        Self {
            kind: TypeKind::List,
            name: None,
            of_type: Some(Box::new(inner)),
        }
    }

    /// Name of the innermost named type.
    pub fn named_type(&self) -> Option<&str> {
        match (&self.name, &self.of_type) {
            (Some(name), _) => Some(name),
            (None, Some(inner)) => inner.named_type(),
            (None, None) => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, &self.of_type) {
            (TypeKind::NonNull, Some(inner)) => write!(f, "{inner}!"),
            (TypeKind::List, Some(inner)) => write!(f, "[{inner}]"),
            _ => f.write_str(self.name.as_deref().unwrap_or("Unknown")),
        }
    }
}

impl IntrospectionSchema {
    pub fn query_type_name(&self) -> Option<&str> {
        self.query_type.as_ref().map(|t| t.name.as_str())
    }

    pub fn mutation_type_name(&self) -> Option<&str> {
        self.mutation_type.as_ref().map(|t| t.name.as_str())
    }

    pub fn subscription_type_name(&self) -> Option<&str> {
        self.subscription_type.as_ref().map(|t| t.name.as_str())
    }

    pub fn find_type(&self, name: &str) -> Option<&FullType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Render the type system as SDL. Built-in scalars, built-in directives
    /// and introspection types are left out.
    pub fn to_sdl(&self) -> String {
        let mut out = String::new();

        let query = self.query_type_name();
        let mutation = self.mutation_type_name();
        let subscription = self.subscription_type_name();
        let conventional = query.is_none_or(|n| n == "Query")
            && mutation.is_none_or(|n| n == "Mutation")
            && subscription.is_none_or(|n| n == "Subscription");
        if !conventional {
            out.push_str("schema {\n");
            for (op, name) in [
                ("query", query),
                ("mutation", mutation),
                ("subscription", subscription),
            ] {
                if let Some(name) = name {
                    let _ = writeln!(out, "  {op}: {name}");
                }
            }
            out.push_str("}\n\n");
        }

        for directive in &self.directives {
            if BUILTIN_DIRECTIVES.contains(&directive.name.as_str()) {
                continue;
            }
            write_description(&mut out, directive.description.as_deref(), "");
            let _ = write!(out, "directive @{}", directive.name);
            write_arguments(&mut out, &directive.args);
            let _ = writeln!(out, " on {}\n", directive.locations.join(" | "));
        }

        for ty in &self.types {
            if ty.name.starts_with("__")
                || (ty.kind == TypeKind::Scalar && BUILTIN_SCALARS.contains(&ty.name.as_str()))
            {
                continue;
            }
            write_type(&mut out, ty);
            out.push('\n');
        }

        out.trim_end().to_string()
    }
}

fn write_type(out: &mut String, ty: &FullType) {
    write_description(out, ty.description.as_deref(), "");
    match ty.kind {
        TypeKind::Scalar => {
            let _ = writeln!(out, "scalar {}", ty.name);
        }
        TypeKind::Object | TypeKind::Interface => {
            let keyword = if ty.kind == TypeKind::Object {
                "type"
            } else {
                "interface"
            };
            let _ = write!(out, "{keyword} {}", ty.name);
            let interfaces: Vec<&str> = ty
                .interfaces
                .iter()
                .flatten()
                .filter_map(TypeRef::named_type)
                .collect();
            if !interfaces.is_empty() {
                let _ = write!(out, " implements {}", interfaces.join(" & "));
            }
            out.push_str(" {\n");
            for field in ty.fields.iter().flatten() {
                write_description(out, field.description.as_deref(), "  ");
                let _ = write!(out, "  {}", field.name);
                write_arguments(out, &field.args);
                let _ = write!(out, ": {}", field.ty);
                write_deprecation(out, field.is_deprecated, field.deprecation_reason.as_deref());
                out.push('\n');
            }
            out.push_str("}\n");
        }
        TypeKind::Union => {
            let members: Vec<&str> = ty
                .possible_types
                .iter()
                .flatten()
                .filter_map(TypeRef::named_type)
                .collect();
            let _ = writeln!(out, "union {} = {}", ty.name, members.join(" | "));
        }
        TypeKind::Enum => {
            let _ = writeln!(out, "enum {} {{", ty.name);
            for value in ty.enum_values.iter().flatten() {
                write_description(out, value.description.as_deref(), "  ");
                let _ = write!(out, "  {}", value.name);
                write_deprecation(out, value.is_deprecated, value.deprecation_reason.as_deref());
                out.push('\n');
            }
            out.push_str("}\n");
        }
        TypeKind::InputObject => {
            let _ = writeln!(out, "input {} {{", ty.name);
            for field in ty.input_fields.iter().flatten() {
                write_description(out, field.description.as_deref(), "  ");
                let _ = write!(out, "  {}: {}", field.name, field.ty);
                if let Some(default) = &field.default_value {
                    let _ = write!(out, " = {default}");
                }
                out.push('\n');
            }
            out.push_str("}\n");
        }
        TypeKind::List | TypeKind::NonNull => {}
    }
}

fn write_arguments(out: &mut String, args: &[InputValueDef]) {
    if args.is_empty() {
        return;
    }
    let rendered: Vec<String> = args
        .iter()
        .map(|arg| match &arg.default_value {
            Some(default) => format!("{}: {} = {default}", arg.name, arg.ty),
            None => format!("{}: {}", arg.name, arg.ty),
        })
        .collect();
    let _ = write!(out, "({})", rendered.join(", "));
}

fn write_deprecation(out: &mut String, deprecated: bool, reason: Option<&str>) {
    if !deprecated {
        return;
    }
    match reason {
        Some(reason) => {
            let _ = write!(out, " @deprecated(reason: {})", quote(reason));
        }
        None => out.push_str(" @deprecated"),
    }
}

fn write_description(out: &mut String, description: Option<&str>, indent: &str) {
    if let Some(description) = description.filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "{indent}{}", quote(description));
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IntrospectionSchema {
        serde_json::from_value(serde_json::json!({
            "queryType": { "name": "Query" },
            "mutationType": null,
            "subscriptionType": null,
            "types": [
                {
                    "kind": "OBJECT",
                    "name": "Query",
                    "description": null,
                    "fields": [{
                        "name": "offers",
                        "description": "Open offers",
                        "args": [{
                            "name": "first",
                            "description": null,
                            "type": { "kind": "SCALAR", "name": "Int", "ofType": null },
                            "defaultValue": "10"
                        }],
                        "type": {
                            "kind": "NON_NULL", "name": null,
                            "ofType": {
                                "kind": "LIST", "name": null,
                                "ofType": { "kind": "OBJECT", "name": "Offer", "ofType": null }
                            }
                        },
                        "isDeprecated": false,
                        "deprecationReason": null
                    }],
                    "inputFields": null,
                    "interfaces": [],
                    "enumValues": null,
                    "possibleTypes": null
                },
                {
                    "kind": "ENUM",
                    "name": "Commodity",
                    "enumValues": [
                        { "name": "CORN", "isDeprecated": false },
                        { "name": "OATS", "isDeprecated": true, "deprecationReason": "gone" }
                    ]
                },
                { "kind": "SCALAR", "name": "String" }
            ],
            "directives": []
        }))
        .unwrap()
    }

    #[test]
    fn test_type_ref_display_and_named_type() {
        let schema = sample();
        let field = &schema.find_type("Query").unwrap().fields.as_ref().unwrap()[0];
        assert_eq!(field.ty.to_string(), "[Offer]!");
        assert_eq!(field.ty.named_type(), Some("Offer"));
    }

    #[test]
    fn test_sdl_skips_builtins() {
        let sdl = sample().to_sdl();
        assert!(sdl.contains("type Query {"));
        assert!(sdl.contains("\"Open offers\""));
        assert!(sdl.contains("offers(first: Int = 10): [Offer]!"));
        assert!(sdl.contains("OATS @deprecated(reason: \"gone\")"));
        assert!(!sdl.contains("scalar String"));
        assert!(!sdl.contains("schema {"));
    }

    #[test]
    fn test_sdl_prints_unconventional_roots() {
        let mut schema = sample();
        schema.query_type = Some(NamedRef {
            name: "RootQuery".to_string(),
        });
        assert!(schema.to_sdl().starts_with("schema {\n  query: RootQuery\n}"));
    }
}
