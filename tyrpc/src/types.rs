//! Structural type descriptors.
//!
//! A [`Type`] validates inbound parameters and shapes outbound results. Types
//! are immutable and cheap to clone; they are composed with combinators:
//!
//! ```rust
//! use tyrpc::{Matcher, Schema, Type};
//!
//! let user = Type::document(
//!     "User",
//!     Schema::new()
//!         .field("id", Type::id())
//!         .field("name", Type::string())
//!         .field("age", Matcher::integer().and(Matcher::new(|v| v.as_i64() >= Some(0))).into())
//!         .field("tags", Type::string().array().optional()),
//! );
//! let page = user.pagination();
//! # let _ = page;
//! ```

use std::sync::Arc;

use crate::{Error, ErrorKind, Result, Value, value::Map};

/// Key injected into serialized documents.
pub const TYPENAME_KEY: &str = "__typename__";

/// Type name of documents built by [`Type::pagination`].
pub const PAGINATION_TYPENAME: &str = "__pagination__";

type Predicate = dyn Fn(&Value) -> bool + Send + Sync;

/// A leaf predicate over a single value.
#[derive(Clone)]
pub struct Matcher(Arc<Predicate>);

impl Matcher {
    pub fn new(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        (self.0)(value)
    }

    /// Intersects two predicates.
    #[must_use]
    pub fn and(self, other: Matcher) -> Matcher {
        Matcher::new(move |value| self.matches(value) && other.matches(value))
    }

    #[must_use]
    pub fn string() -> Self {
        Self::new(|v| matches!(v, Value::String(_)))
    }

    #[must_use]
    pub fn id() -> Self {
        Self::string()
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::new(|v| matches!(v, Value::Bool(_)))
    }

    #[must_use]
    pub fn number() -> Self {
        Self::new(|v| matches!(v, Value::Number(_)))
    }

    #[must_use]
    pub fn integer() -> Self {
        Self::new(is_integral)
    }

    /// Numbers with a fractional part.
    #[must_use]
    pub fn float() -> Self {
        Self::new(|v| matches!(v, Value::Number(_)) && !is_integral(v))
    }

    #[must_use]
    pub fn upload() -> Self {
        Self::new(|v| matches!(v, Value::Upload(_)))
    }
}

fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
        }
        _ => false,
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Matcher")
    }
}

/// Ordered field declarations of a structural type. Also used on its own as
/// an endpoint's parameter schema.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    fields: Vec<(String, Type)>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field; redeclaring a name replaces its type in place.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, ty: Type) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = ty,
            None => self.fields.push((name, ty)),
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.fields.iter().map(|(n, t)| (n.as_str(), t))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug)]
pub enum TypeNode {
    Matcher(Matcher),
    Array(Type),
    Optional(Type),
    Schema {
        schema: Schema,
        typename: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct Type(Arc<TypeNode>);

impl From<Matcher> for Type {
    fn from(matcher: Matcher) -> Self {
        Self::new(TypeNode::Matcher(matcher))
    }
}

impl Type {
    fn new(node: TypeNode) -> Self {
        Self(Arc::new(node))
    }

    #[must_use]
    pub fn node(&self) -> &TypeNode {
        &self.0
    }

    pub fn matcher(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Matcher::new(predicate).into()
    }

    #[must_use]
    pub fn schema(schema: Schema) -> Self {
        Self::new(TypeNode::Schema {
            schema,
            typename: None,
        })
    }

    /// A schema whose serialized form carries `__typename__`.
    #[must_use]
    pub fn document(typename: impl Into<String>, schema: Schema) -> Self {
        Self::new(TypeNode::Schema {
            schema,
            typename: Some(typename.into()),
        })
    }

    #[must_use]
    pub fn string() -> Self {
        Matcher::string().into()
    }

    #[must_use]
    pub fn id() -> Self {
        Matcher::id().into()
    }

    #[must_use]
    pub fn boolean() -> Self {
        Matcher::boolean().into()
    }

    #[must_use]
    pub fn number() -> Self {
        Matcher::number().into()
    }

    #[must_use]
    pub fn integer() -> Self {
        Matcher::integer().into()
    }

    #[must_use]
    pub fn float() -> Self {
        Matcher::float().into()
    }

    #[must_use]
    pub fn upload() -> Self {
        Matcher::upload().into()
    }

    /// A list of this type. An array element is only accepted as an array
    /// when this type is itself an array type.
    #[must_use]
    pub fn array(&self) -> Self {
        Self::new(TypeNode::Array(self.clone()))
    }

    #[must_use]
    pub fn optional(&self) -> Self {
        Self::new(TypeNode::Optional(self.clone()))
    }

    /// `{nodes: [Self], hasNextPage: Boolean, nextPageCursor: String?}`.
    #[must_use]
    pub fn pagination(&self) -> Self {
        Self::document(
            PAGINATION_TYPENAME,
            Schema::new()
                .field("nodes", self.array())
                .field("hasNextPage", Type::boolean())
                .field("nextPageCursor", Type::string().optional()),
        )
    }

    /// Builds a new document from this schema type, replacing the types of a
    /// strict subset of its fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `self` is not a schema type, if an
    /// override names an unknown field, or if every field is overridden.
    pub fn derive(&self, typename: impl Into<String>, overrides: Schema) -> Result<Type> {
        let TypeNode::Schema { schema, .. } = self.node() else {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "only schema types can be derived",
            ));
        };
        if let Some((name, _)) = overrides.fields().find(|(name, _)| schema.get(name).is_none()) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("cannot override unknown field \"{name}\""),
            ));
        }
        if !schema.is_empty() && overrides.len() >= schema.len() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "overrides must cover a strict subset of the fields",
            ));
        }

        let mut derived = schema.clone();
        for (name, ty) in overrides.fields {
            derived = derived.field(name, ty);
        }
        Ok(Type::document(typename, derived))
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        matches!(self.node(), TypeNode::Optional(_))
    }

    #[must_use]
    pub fn typename(&self) -> Option<&str> {
        match self.node() {
            TypeNode::Schema { typename, .. } => typename.as_deref(),
            _ => None,
        }
    }

    fn accepts_arrays(&self) -> bool {
        match self.node() {
            TypeNode::Array(_) => true,
            TypeNode::Optional(inner) => inner.accepts_arrays(),
            _ => false,
        }
    }

    /// Checks an inbound value, reporting the first offending field path.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error naming the field path.
    pub fn validate(&self, value: &Value, path: Option<&str>) -> Result<()> {
        match self.node() {
            TypeNode::Optional(inner) => {
                if value.is_null() {
                    return Ok(());
                }
                inner.validate(value, path)
            }
            TypeNode::Array(inner) => {
                let Value::Array(items) = value else {
                    return Err(params_error(path));
                };
                for (i, item) in items.iter().enumerate() {
                    let item_path = index_path(path, i);
                    inner.check_element(item, &item_path, params_error)?;
                    inner.validate(item, Some(&item_path))?;
                }
                Ok(())
            }
            TypeNode::Matcher(matcher) => {
                if matcher.matches(value) {
                    Ok(())
                } else {
                    Err(params_error(path))
                }
            }
            TypeNode::Schema { schema, .. } => {
                if !matches!(value, Value::Object(_)) {
                    return Err(params_error(path));
                }
                for (name, ty) in schema.fields() {
                    ty.validate(value.field(name), Some(&field_path(path, name)))?;
                }
                Ok(())
            }
        }
    }

    /// Produces the outbound form of a result value: undeclared fields are
    /// dropped and documents gain their type-name tag.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error naming the field path.
    pub fn serialize(&self, value: &Value) -> Result<Value> {
        self.serialize_at(value, None)
    }

    fn serialize_at(&self, value: &Value, path: Option<&str>) -> Result<Value> {
        match self.node() {
            TypeNode::Optional(inner) => {
                if value.is_null() {
                    return Ok(Value::Null);
                }
                inner.serialize_at(value, path)
            }
            TypeNode::Array(inner) => {
                let Value::Array(items) = value else {
                    return Err(result_error(path));
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let item_path = index_path(path, i);
                        inner.check_element(item, &item_path, result_error)?;
                        inner.serialize_at(item, Some(&item_path))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            TypeNode::Matcher(matcher) => {
                if matcher.matches(value) {
                    Ok(value.clone())
                } else {
                    Err(result_error(path))
                }
            }
            TypeNode::Schema { schema, typename } => {
                if !matches!(value, Value::Object(_)) {
                    return Err(result_error(path));
                }
                let mut out = Map::new();
                for (name, ty) in schema.fields() {
                    let field = ty.serialize_at(value.field(name), Some(&field_path(path, name)))?;
                    out.insert(name.to_string(), field);
                }
                if let Some(typename) = typename {
                    out.insert(TYPENAME_KEY.to_string(), Value::String(typename.clone()));
                }
                Ok(Value::Object(out))
            }
        }
    }

    /// Element rules shared by both directions: nested arrays need an array
    /// element type and nulls need an optional one.
    fn check_element(&self, item: &Value, path: &str, error: fn(Option<&str>) -> Error) -> Result<()> {
        if (item.is_array() && !self.accepts_arrays()) || (item.is_null() && !self.is_optional()) {
            return Err(error(Some(path)));
        }
        Ok(())
    }
}

fn field_path(path: Option<&str>, name: &str) -> String {
    match path {
        Some(path) => format!("{path}.{name}"),
        None => name.to_string(),
    }
}

fn index_path(path: Option<&str>, index: usize) -> String {
    format!("{}[{index}]", path.unwrap_or_default())
}

fn params_error(path: Option<&str>) -> Error {
    match path {
        Some(path) => Error::new(
            ErrorKind::Validation,
            format!("Invalid param value for \"{path}\"."),
        ),
        None => Error::new(ErrorKind::Validation, "Invalid params value."),
    }
}

fn result_error(path: Option<&str>) -> Error {
    match path {
        Some(path) => Error::new(
            ErrorKind::Validation,
            format!("Invalid result value for \"{path}\"."),
        ),
        None => Error::new(ErrorKind::Validation, "Invalid result value."),
    }
}

/// Validates an endpoint's parameters. Without a schema only `null` is accepted.
///
/// # Errors
///
/// Returns a `Validation` error on mismatch.
pub fn validate_params(schema: Option<&Schema>, params: &Value) -> Result<()> {
    match schema {
        None if params.is_null() => Ok(()),
        None => Err(params_error(None)),
        Some(schema) => {
            if !matches!(params, Value::Object(_)) {
                return Err(params_error(None));
            }
            for (name, ty) in schema.fields() {
                ty.validate(params.field(name), Some(name))?;
            }
            Ok(())
        }
    }
}

/// Serializes a resolver's value. Without a result type only `null` is accepted.
///
/// # Errors
///
/// Returns a `Validation` error on mismatch.
pub fn serialize_result(ty: Option<&Type>, value: &Value) -> Result<Value> {
    match ty {
        None if value.is_null() => Ok(Value::Null),
        None => Err(result_error(None)),
        Some(ty) => ty.serialize(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn v(json: serde_json::Value) -> Value {
        json.into()
    }

    fn message(result: Result<impl std::fmt::Debug>) -> String {
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        err.msg
    }

    fn user() -> Type {
        Type::document(
            "User",
            Schema::new()
                .field("id", Type::id())
                .field("name", Type::string())
                .field("email", Type::string().optional()),
        )
    }

    #[test]
    fn test_builtin_matchers() {
        assert!(Matcher::integer().matches(&v(json!(3))));
        assert!(Matcher::integer().matches(&v(json!(3.0))));
        assert!(!Matcher::integer().matches(&v(json!(3.5))));
        assert!(Matcher::float().matches(&v(json!(3.5))));
        assert!(!Matcher::float().matches(&v(json!(3))));
        assert!(Matcher::number().matches(&v(json!(-1))));
        assert!(!Matcher::string().matches(&v(json!(1))));
        assert!(Matcher::boolean().matches(&v(json!(false))));
        assert!(!Matcher::upload().matches(&v(json!({"__upload__": 0}))));
    }

    #[test]
    fn test_matcher_and() {
        let positive = Matcher::integer().and(Matcher::new(|v| v.as_i64().is_some_and(|n| n > 0)));
        assert!(positive.matches(&v(json!(2))));
        assert!(!positive.matches(&v(json!(-2))));
        assert!(!positive.matches(&v(json!("2"))));
    }

    #[test]
    fn test_serialize_keeps_declared_fields_only() {
        let out = user()
            .serialize(&v(json!({"id": "1", "name": "a", "password": "secret"})))
            .unwrap();
        assert_eq!(
            out.to_json(),
            json!({"id": "1", "name": "a", "email": null, "__typename__": "User"})
        );

        let plain = Type::schema(Schema::new().field("x", Type::integer()));
        let out = plain.serialize(&v(json!({"x": 1, "y": 2}))).unwrap();
        assert_eq!(out.to_json(), json!({"x": 1}));
    }

    #[test]
    fn test_optional_skips_matcher() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = calls.clone();
            Type::matcher(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            })
        };
        let ty = counted.optional();
        ty.validate(&Value::Null, Some("x")).unwrap();
        assert_eq!(ty.serialize(&Value::Null).unwrap(), Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_required_array_field() {
        let schema = Schema::new().field("tags", Type::string().array());

        validate_params(Some(&schema), &v(json!({"tags": []}))).unwrap();
        validate_params(Some(&schema), &v(json!({"tags": ["a", "b"]}))).unwrap();
        assert_eq!(
            message(validate_params(Some(&schema), &v(json!({})))),
            "Invalid param value for \"tags\"."
        );
        assert_eq!(
            message(validate_params(Some(&schema), &v(json!({"tags": ["a", null]})))),
            "Invalid param value for \"tags[1]\"."
        );
        assert_eq!(
            message(validate_params(Some(&schema), &v(json!({"tags": [["a"]]})))),
            "Invalid param value for \"tags[0]\"."
        );

        // a permissive matcher still cannot take nested arrays or nulls
        let any = Schema::new().field("xs", Type::matcher(|_| true).array());
        assert!(validate_params(Some(&any), &v(json!({"xs": [[1]]}))).is_err());
        assert!(validate_params(Some(&any), &v(json!({"xs": [null]}))).is_err());

        let optional_items = Schema::new().field("xs", Type::string().optional().array());
        validate_params(Some(&optional_items), &v(json!({"xs": [null, "a"]}))).unwrap();

        let matrix = Schema::new().field("m", Type::integer().array().array());
        validate_params(Some(&matrix), &v(json!({"m": [[1, 2], []]}))).unwrap();
    }

    #[test]
    fn test_nested_paths() {
        let schema = Schema::new().field(
            "users",
            Type::schema(Schema::new().field("profile", user())).array(),
        );
        let params = v(json!({"users": [{"profile": {"id": "1", "name": "a"}}, {"profile": {"id": 2}}]}));
        assert_eq!(
            message(validate_params(Some(&schema), &params)),
            "Invalid param value for \"users[1].profile.id\"."
        );
    }

    #[test]
    fn test_params_without_schema() {
        validate_params(None, &Value::Null).unwrap();
        assert_eq!(
            message(validate_params(None, &v(json!({})))),
            "Invalid params value."
        );

        let schema = Schema::new().field("a", Type::string().optional());
        validate_params(Some(&schema), &v(json!({}))).unwrap();
        assert_eq!(
            message(validate_params(Some(&schema), &Value::Null)),
            "Invalid params value."
        );
        assert_eq!(
            message(validate_params(Some(&schema), &v(json!("str")))),
            "Invalid params value."
        );
    }

    #[test]
    fn test_result_without_type() {
        assert_eq!(serialize_result(None, &Value::Null).unwrap(), Value::Null);
        assert_eq!(
            message(serialize_result(None, &v(json!(1)))),
            "Invalid result value."
        );
        assert_eq!(
            message(serialize_result(Some(&Type::string()), &Value::Null)),
            "Invalid result value."
        );
        assert_eq!(
            message(serialize_result(Some(&user()), &v(json!({"id": "1", "name": 5})))),
            "Invalid result value for \"name\"."
        );
        assert_eq!(
            message(serialize_result(Some(&user().array()), &v(json!([{"id": "1", "name": "a"}, 3])))),
            "Invalid result value for \"[1]\"."
        );
    }

    #[test]
    fn test_pagination() {
        let page = user().pagination();
        assert_eq!(page.typename(), Some(PAGINATION_TYPENAME));
        let out = page
            .serialize(&v(json!({"nodes": [{"id": "1", "name": "a"}], "hasNextPage": false})))
            .unwrap();
        assert_eq!(
            out.to_json(),
            json!({
                "nodes": [{"id": "1", "name": "a", "email": null, "__typename__": "User"}],
                "hasNextPage": false,
                "nextPageCursor": null,
                "__typename__": "__pagination__",
            })
        );
    }

    #[test]
    fn test_derive_document() {
        let admin = user()
            .derive("Admin", Schema::new().field("email", Type::string()))
            .unwrap();
        assert_eq!(admin.typename(), Some("Admin"));
        // the override made email required
        assert!(admin.serialize(&v(json!({"id": "1", "name": "a"}))).is_err());
        let out = admin
            .serialize(&v(json!({"id": "1", "name": "a", "email": "e"})))
            .unwrap();
        assert_eq!(out.field(TYPENAME_KEY).as_str(), Some("Admin"));

        let err = user()
            .derive("Bad", Schema::new().field("nope", Type::string()))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let all = Schema::new()
            .field("id", Type::id())
            .field("name", Type::string())
            .field("email", Type::string());
        assert!(user().derive("All", all).is_err());
        assert!(Type::string().derive("S", Schema::new()).is_err());
    }
}
