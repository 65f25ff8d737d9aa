//! The `db` proxy: database, collection and cursor methods backed by the store.

use super::builtins::arg;
use super::interp::{throw, Eval, Flow, Interp};
use super::value::{from_json, to_json, Value};
use mealplan_store::document::{get_path, remove_path, set_path, values_equal};
use mealplan_store::{
    Document, Filter, FindOptions, IndexSpec, ObjectId, StoreError, Update,
};
use serde_json::{Map, Value as Json};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;

pub(crate) const DB_METHODS: &[&str] = &["getCollection", "getCollectionNames", "getName"];

pub(crate) const COLLECTION_METHODS: &[&str] = &[
    "find",
    "findOne",
    "insertOne",
    "insertMany",
    "updateOne",
    "updateMany",
    "deleteOne",
    "deleteMany",
    "countDocuments",
    "count",
    "estimatedDocumentCount",
    "distinct",
    "drop",
    "getIndexes",
    "createIndex",
    "getName",
];

pub(crate) const CURSOR_METHODS: &[&str] = &[
    "toArray", "limit", "skip", "sort", "count", "forEach", "map", "hasNext", "next",
];

/// A lazily executed query.
pub(crate) struct Cursor {
    pub collection: String,
    filter: Filter,
    projection: Option<Json>,
    skip: usize,
    limit: Option<usize>,
    sort: Vec<(String, i64)>,
    maps: Vec<Value>,
    /// Fetched documents not yet consumed; `None` until the query runs.
    buffer: Option<VecDeque<Value>>,
}

impl Cursor {
    fn new(collection: &str, filter: Filter, projection: Option<Json>) -> Self {
        Self {
            collection: collection.to_string(),
            filter,
            projection,
            skip: 0,
            limit: None,
            sort: Vec::new(),
            maps: Vec::new(),
            buffer: None,
        }
    }

    fn options(&self) -> FindOptions {
        FindOptions {
            skip: self.skip,
            limit: self.limit,
            sort: self.sort.clone(),
        }
    }
}

fn store_error(err: StoreError) -> Flow {
    throw("MongoServerError", err.to_string())
}

fn json_arg(value: &Value) -> Eval<Json> {
    to_json(value).map_err(|m| throw("TypeError", m))
}

fn filter_arg(value: &Value) -> Eval<Filter> {
    if value.is_nullish() {
        return Ok(Filter::All);
    }
    Filter::parse(&json_arg(value)?).map_err(store_error)
}

fn document_arg(value: &Value) -> Eval<Document> {
    match json_arg(value)? {
        Json::Object(map) => Ok(map),
        _ => Err(throw(
            "MongoInvalidArgumentError",
            "Document must be a valid object",
        )),
    }
}

fn count_arg(value: &Value, method: &str) -> Eval<usize> {
    let n = value.to_number();
    if n.is_finite() && n >= 0.0 {
        Ok(n as usize)
    } else {
        Err(throw("TypeError", format!("{method} requires a non-negative number")))
    }
}

/// Property access on `db`: methods, or a collection of that name.
pub(crate) fn db_property(key: &str) -> Value {
    if DB_METHODS.contains(&key) {
        Value::method(Value::Db, key)
    } else {
        Value::Collection(key.into())
    }
}

/// Property access on a collection: methods, or a dotted sub-collection.
pub(crate) fn collection_property(this: &Value, name: &str, key: &str) -> Value {
    if COLLECTION_METHODS.contains(&key) {
        Value::method(this.clone(), key)
    } else {
        Value::Collection(format!("{name}.{key}").into())
    }
}

/// Dispatches a method call on a `db`, collection or cursor value.
pub(crate) fn call(interp: &mut Interp<'_>, this: &Value, name: &str, args: Vec<Value>) -> Eval<Value> {
    match this {
        Value::Db => db_method(interp, name, &args),
        Value::Collection(coll) => collection_method(interp, coll, name, &args),
        Value::Cursor(cursor) => cursor_method(interp, this, cursor, name, args),
        other => Err(throw(
            "TypeError",
            format!("{}.{name} is not a function", other.type_of()),
        )),
    }
}

fn db_method(interp: &mut Interp<'_>, name: &str, args: &[Value]) -> Eval<Value> {
    match name {
        "getCollection" => match arg(args, 0) {
            Value::Str(coll) if !coll.is_empty() => Ok(Value::Collection(coll.into())),
            _ => Err(throw("TypeError", "Collection name must be a non-empty string")),
        },
        "getCollectionNames" => {
            let names = interp.store.collection_names().map_err(store_error)?;
            Ok(Value::array(names.into_iter().map(Value::Str).collect()))
        }
        "getName" => Ok(Value::Str(interp.store.engine().database)),
        other => Err(throw("TypeError", format!("db.{other} is not a function"))),
    }
}

fn collection_method(interp: &mut Interp<'_>, coll: &str, name: &str, args: &[Value]) -> Eval<Value> {
    debug!(collection = coll, method = name, "script store call");
    let store = interp.store;
    match name {
        "find" => {
            let filter = filter_arg(&arg(args, 0))?;
            let projection = match arg(args, 1) {
                Value::Undefined | Value::Null => None,
                other => Some(json_arg(&other)?),
            };
            Ok(Value::Cursor(Rc::new(RefCell::new(Cursor::new(coll, filter, projection)))))
        }
        "findOne" => {
            let filter = filter_arg(&arg(args, 0))?;
            let docs = store
                .find(coll, &filter, &FindOptions::limit(1))
                .map_err(store_error)?;
            let projection = json_arg(&arg(args, 1))?;
            Ok(docs.into_iter().next().map_or(Value::Null, |doc| {
                from_json(&Json::Object(project(doc, &projection)))
            }))
        }
        "insertOne" => {
            let target = arg(args, 0);
            let doc = prepare_insert(&target)?;
            let ids = store.insert_many(coll, vec![doc]).map_err(store_error)?;
            let id = ids.first().map_or(Value::Null, from_json);
            Ok(Value::object(vec![
                ("acknowledged".into(), Value::Bool(true)),
                ("insertedId".into(), id),
            ]))
        }
        "insertMany" => {
            let Value::Array(items) = arg(args, 0) else {
                return Err(throw(
                    "MongoInvalidArgumentError",
                    "Argument \"docs\" must be an array of documents",
                ));
            };
            let items: Vec<Value> = items.borrow().clone();
            let docs = items.iter().map(prepare_insert).collect::<Eval<Vec<_>>>()?;
            let ids = store.insert_many(coll, docs).map_err(store_error)?;
            let inserted = ids
                .iter()
                .enumerate()
                .map(|(i, id)| (i.to_string(), from_json(id)))
                .collect();
            Ok(Value::object(vec![
                ("acknowledged".into(), Value::Bool(true)),
                ("insertedIds".into(), Value::object(inserted)),
            ]))
        }
        "updateOne" | "updateMany" => {
            let filter = filter_arg(&arg(args, 0))?;
            let update = Update::parse(&json_arg(&arg(args, 1))?).map_err(store_error)?;
            let outcome = store
                .update(coll, &filter, &update, name == "updateMany")
                .map_err(store_error)?;
            Ok(Value::object(vec![
                ("acknowledged".into(), Value::Bool(true)),
                ("insertedId".into(), Value::Null),
                ("matchedCount".into(), Value::Number(outcome.matched_count as f64)),
                ("modifiedCount".into(), Value::Number(outcome.modified_count as f64)),
                ("upsertedCount".into(), Value::Number(0.0)),
            ]))
        }
        "deleteOne" | "deleteMany" => {
            let filter = filter_arg(&arg(args, 0))?;
            let deleted = store
                .delete(coll, &filter, name == "deleteMany")
                .map_err(store_error)?;
            Ok(Value::object(vec![
                ("acknowledged".into(), Value::Bool(true)),
                ("deletedCount".into(), Value::Number(deleted as f64)),
            ]))
        }
        "countDocuments" | "count" => {
            let filter = filter_arg(&arg(args, 0))?;
            let n = store.count(coll, &filter).map_err(store_error)?;
            Ok(Value::Number(n as f64))
        }
        "estimatedDocumentCount" => {
            let n = store.count(coll, &Filter::All).map_err(store_error)?;
            Ok(Value::Number(n as f64))
        }
        "distinct" => {
            let Value::Str(field) = arg(args, 0) else {
                return Err(throw("TypeError", "distinct requires a field name"));
            };
            let filter = filter_arg(&arg(args, 1))?;
            let docs = store
                .find(coll, &filter, &FindOptions::default())
                .map_err(store_error)?;
            Ok(Value::array(
                distinct(&docs, &field).iter().map(from_json).collect(),
            ))
        }
        "drop" => Ok(Value::Bool(store.drop_collection(coll).map_err(store_error)?)),
        "getIndexes" => {
            let specs = store.indexes(coll).map_err(store_error)?;
            Ok(Value::array(
                specs.iter().map(|spec| from_json(&spec.to_json())).collect(),
            ))
        }
        "createIndex" => {
            let keys = json_arg(&arg(args, 0))?;
            let options = match arg(args, 1) {
                Value::Undefined | Value::Null => None,
                other => Some(json_arg(&other)?),
            };
            let spec = IndexSpec::from_json(&keys, options.as_ref()).map_err(store_error)?;
            let name = store.create_index(coll, spec).map_err(store_error)?;
            Ok(Value::Str(name))
        }
        "getName" => Ok(Value::str(coll)),
        other => Err(throw(
            "TypeError",
            format!("db.{coll}.{other} is not a function"),
        )),
    }
}

/// Converts an insert argument to a document, assigning `_id` on the
/// caller's object when it has none.
fn prepare_insert(value: &Value) -> Eval<Document> {
    if let Value::Object(obj) = value {
        if !obj.borrow().contains("_id") {
            obj.borrow_mut().set("_id", Value::ObjectId(ObjectId::new()));
        }
    }
    document_arg(value)
}

fn distinct(docs: &[Document], field: &str) -> Vec<Json> {
    let mut seen: Vec<Json> = Vec::new();
    let mut push = |v: &Json| {
        if !seen.iter().any(|s| values_equal(s, v)) {
            seen.push(v.clone());
        }
    };
    for doc in docs {
        match get_path(doc, field) {
            Some(Json::Array(items)) => items.iter().for_each(&mut push),
            Some(v) => push(v),
            None => {}
        }
    }
    seen
}

fn json_truthy(value: &Json) -> bool {
    match value {
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Json::Null => false,
        _ => true,
    }
}

/// Applies an inclusion or exclusion projection.
fn project(doc: Document, projection: &Json) -> Document {
    let Json::Object(spec) = projection else {
        return doc;
    };
    if spec.is_empty() {
        return doc;
    }
    let keep_id = spec.get("_id").map_or(true, json_truthy);
    let fields: Vec<(&String, bool)> = spec
        .iter()
        .filter(|(k, _)| k.as_str() != "_id")
        .map(|(k, v)| (k, json_truthy(v)))
        .collect();

    if fields.iter().any(|(_, on)| *on) {
        let mut out = Map::new();
        if keep_id {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".into(), id.clone());
            }
        }
        for (path, on) in fields {
            if on {
                if let Some(v) = get_path(&doc, path) {
                    set_path(&mut out, path, v.clone());
                }
            }
        }
        out
    } else {
        let mut out = doc;
        for (path, _) in fields {
            remove_path(&mut out, path);
        }
        if !keep_id {
            out.remove("_id");
        }
        out
    }
}

fn sort_spec(value: &Value) -> Eval<Vec<(String, i64)>> {
    let Json::Object(map) = json_arg(value)? else {
        return Err(throw("TypeError", "sort requires an object"));
    };
    map.into_iter()
        .map(|(field, dir)| match dir.as_i64() {
            Some(1) => Ok((field, 1)),
            Some(-1) => Ok((field, -1)),
            _ => Err(throw(
                "MongoServerError",
                format!("Invalid sort direction for {field}: {dir}"),
            )),
        })
        .collect()
}

fn cursor_method(
    interp: &mut Interp<'_>,
    this: &Value,
    cursor: &Rc<RefCell<Cursor>>,
    name: &str,
    args: Vec<Value>,
) -> Eval<Value> {
    match name {
        "limit" | "skip" | "sort" => {
            if cursor.borrow().buffer.is_some() {
                return Err(throw(
                    "MongoCursorInUseError",
                    "Cursor is already initialized",
                ));
            }
            let first = arg(&args, 0);
            let mut c = cursor.borrow_mut();
            match name {
                "limit" => {
                    let n = count_arg(&first, name)?;
                    c.limit = (n > 0).then_some(n);
                }
                "skip" => c.skip = count_arg(&first, name)?,
                _ => c.sort = sort_spec(&first)?,
            }
            Ok(this.clone())
        }
        "map" => {
            let f = arg(&args, 0);
            if !f.is_callable() {
                return Err(throw("TypeError", "map requires a function"));
            }
            cursor.borrow_mut().maps.push(f);
            Ok(this.clone())
        }
        "count" => {
            let (coll, filter) = {
                let c = cursor.borrow();
                (c.collection.clone(), c.filter.clone())
            };
            let n = interp.store.count(&coll, &filter).map_err(store_error)?;
            Ok(Value::Number(n as f64))
        }
        "hasNext" => {
            fill(interp, cursor)?;
            Ok(Value::Bool(
                cursor.borrow().buffer.as_ref().is_some_and(|b| !b.is_empty()),
            ))
        }
        "next" => {
            fill(interp, cursor)?;
            let doc = cursor.borrow_mut().buffer.as_mut().and_then(VecDeque::pop_front);
            match doc {
                Some(doc) => apply_maps(interp, cursor, doc),
                None => Err(throw("MongoCursorExhaustedError", "Cursor is exhausted")),
            }
        }
        "toArray" => {
            let docs = drain(interp, cursor)?;
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                out.push(apply_maps(interp, cursor, doc)?);
            }
            Ok(Value::array(out))
        }
        "forEach" => {
            let f = arg(&args, 0);
            if !f.is_callable() {
                return Err(throw("TypeError", "forEach requires a function"));
            }
            for doc in drain(interp, cursor)? {
                let doc = apply_maps(interp, cursor, doc)?;
                interp.call_function(&f, Value::Undefined, vec![doc])?;
            }
            Ok(Value::Undefined)
        }
        other => Err(throw("TypeError", format!("cursor.{other} is not a function"))),
    }
}

/// Runs the query if it has not run yet.
fn fill(interp: &mut Interp<'_>, cursor: &Rc<RefCell<Cursor>>) -> Eval<()> {
    if cursor.borrow().buffer.is_some() {
        return Ok(());
    }
    let (coll, filter, options, projection) = {
        let c = cursor.borrow();
        (c.collection.clone(), c.filter.clone(), c.options(), c.projection.clone())
    };
    let docs = interp
        .store
        .find(&coll, &filter, &options)
        .map_err(store_error)?;
    let projection = projection.unwrap_or(Json::Null);
    let values = docs
        .into_iter()
        .map(|doc| from_json(&Json::Object(project(doc, &projection))))
        .collect();
    cursor.borrow_mut().buffer = Some(values);
    Ok(())
}

fn drain(interp: &mut Interp<'_>, cursor: &Rc<RefCell<Cursor>>) -> Eval<Vec<Value>> {
    fill(interp, cursor)?;
    Ok(cursor
        .borrow_mut()
        .buffer
        .as_mut()
        .map(|b| b.drain(..).collect())
        .unwrap_or_default())
}

fn apply_maps(interp: &mut Interp<'_>, cursor: &Rc<RefCell<Cursor>>, doc: Value) -> Eval<Value> {
    let maps = cursor.borrow().maps.clone();
    let mut value = doc;
    for f in &maps {
        value = interp.call_function(f, Value::Undefined, vec![value])?;
    }
    Ok(value)
}

/// Values reachable as `cursor.<key>`.
pub(crate) fn cursor_property(this: &Value, key: &str) -> Value {
    if CURSOR_METHODS.contains(&key) {
        Value::method(this.clone(), key)
    } else {
        Value::Undefined
    }
}
