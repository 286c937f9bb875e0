//! Resolver-less schema that answers introspection for a merged type system.
//!
//! Root fields are routed to their owning sources, so nothing in this schema
//! ever resolves real data. It only exists to serve `__schema`, `__type` and
//! `__typename` over the union of all sources.
use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputObject, InputValue, Interface,
    InterfaceField, Object, ResolverContext, Scalar, Schema, TypeRef as DynTypeRef, Union,
};

use super::{
    SchemaBuildError,
    introspection::{FullType, InputValueDef, TypeKind, TypeRef},
    merge::{MergedTypeSystem, RootKind},
};

const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

fn unresolved(_ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async { Ok(None::<FieldValue>) })
}

fn dyn_type_ref(ty: &TypeRef) -> DynTypeRef {
    match (ty.kind, &ty.of_type) {
        (TypeKind::NonNull, Some(inner)) => DynTypeRef::NonNull(Box::new(dyn_type_ref(inner))),
        (TypeKind::List, Some(inner)) => DynTypeRef::List(Box::new(dyn_type_ref(inner))),
        _ => DynTypeRef::named(ty.name.clone().unwrap_or_default()),
    }
}

fn input_value(def: &InputValueDef) -> InputValue {
    let mut value = InputValue::new(def.name.clone(), dyn_type_ref(&def.ty));
    if let Some(description) = &def.description {
        value = value.description(description.clone());
    }
    value
}

/// Build the shadow schema. Subscription roots are left out.
pub fn build(merged: &MergedTypeSystem) -> Result<Schema, SchemaBuildError> {
    let query = merged
        .root_type_name(RootKind::Query)
        .ok_or(SchemaBuildError::MissingQueryRoot)?;
    let mutation = merged.root_type_name(RootKind::Mutation);
    let subscription = merged.root_type_name(RootKind::Subscription);

    let mut builder = Schema::build(query, mutation, None);
    for ty in &merged.schema().types {
        if ty.name.starts_with("__") || Some(ty.name.as_str()) == subscription {
            continue;
        }
        builder = match ty.kind {
            TypeKind::Scalar if BUILTIN_SCALARS.contains(&ty.name.as_str()) => continue,
            TypeKind::Scalar => {
                let mut scalar = Scalar::new(ty.name.clone());
                if let Some(description) = &ty.description {
                    scalar = scalar.description(description.clone());
                }
                builder.register(scalar)
            }
            TypeKind::Object => builder.register(object(ty)),
            TypeKind::Interface => builder.register(interface(ty)),
            TypeKind::Union => {
                let mut union = Union::new(ty.name.clone());
                for member in ty.possible_types.iter().flatten() {
                    if let Some(name) = member.named_type() {
                        union = union.possible_type(name);
                    }
                }
                builder.register(union)
            }
            TypeKind::Enum => {
                let mut enumeration = Enum::new(ty.name.clone());
                for value in ty.enum_values.iter().flatten() {
                    let mut item = EnumItem::new(value.name.clone());
                    if let Some(description) = &value.description {
                        item = item.description(description.clone());
                    }
                    if value.is_deprecated {
                        item = item.deprecation(value.deprecation_reason.as_deref());
                    }
                    enumeration = enumeration.item(item);
                }
                builder.register(enumeration)
            }
            TypeKind::InputObject => {
                let mut input = InputObject::new(ty.name.clone());
                for field in ty.input_fields.iter().flatten() {
                    input = input.field(input_value(field));
                }
                builder.register(input)
            }
            TypeKind::List | TypeKind::NonNull => continue,
        };
    }

    builder
        .finish()
        .map_err(|e| SchemaBuildError::Introspection(e.to_string()))
}

fn object(ty: &FullType) -> Object {
    let mut object = Object::new(ty.name.clone());
    if let Some(description) = &ty.description {
        object = object.description(description.clone());
    }
    for interface in ty.interfaces.iter().flatten() {
        if let Some(name) = interface.named_type() {
            object = object.implement(name);
        }
    }
    for def in ty.fields.iter().flatten() {
        let mut field = Field::new(def.name.clone(), dyn_type_ref(&def.ty), unresolved);
        if let Some(description) = &def.description {
            field = field.description(description.clone());
        }
        if def.is_deprecated {
            field = field.deprecation(def.deprecation_reason.as_deref());
        }
        for arg in &def.args {
            field = field.argument(input_value(arg));
        }
        object = object.field(field);
    }
    object
}

fn interface(ty: &FullType) -> Interface {
    let mut interface = Interface::new(ty.name.clone());
    if let Some(description) = &ty.description {
        interface = interface.description(description.clone());
    }
    for parent in ty.interfaces.iter().flatten() {
        if let Some(name) = parent.named_type() {
            interface = interface.implement(name);
        }
    }
    for def in ty.fields.iter().flatten() {
        let mut field = InterfaceField::new(def.name.clone(), dyn_type_ref(&def.ty));
        if let Some(description) = &def.description {
            field = field.description(description.clone());
        }
        for arg in &def.args {
            field = field.argument(input_value(arg));
        }
        interface = interface.field(field);
    }
    interface
}
