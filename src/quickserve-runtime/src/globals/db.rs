use std::rc::Rc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Exception, Value};
use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value as Json};

use super::coerce_fn_signature;
use crate::RuntimeShared;

/// Build the `db.query(sql, ...args)` binding.
///
/// Arguments may be positional scalars or a single array that is spread.
/// Rows come back as objects keyed by column name. Driver errors are logged
/// and yield an empty sequence rather than throwing into the script.
pub(crate) fn query(
    shared: Rc<RuntimeShared>,
) -> impl for<'js> Fn(Ctx<'js>, Rest<Value<'js>>) -> rquickjs::Result<Value<'js>> {
    coerce_fn_signature(move |ctx: Ctx<'_>, args: Rest<Value<'_>>| {
        let mut args = args.into_inner().into_iter();

        let sql = match args.next().as_ref().and_then(Value::as_string) {
            Some(sql) => sql.to_string()?,
            None => {
                return Err(Exception::throw_type(
                    &ctx,
                    "db.query: first argument must be a SQL string",
                ));
            }
        };

        let params = collect_params(args.collect())?;

        match run_query(&shared, &sql, params) {
            Ok(rows) => {
                let rows = serde_json::to_string(&rows).map_err(|_| rquickjs::Error::Unknown)?;
                ctx.json_parse(rows)
            }
            Err(error) => {
                tracing::error!(%error, sql = %sql, "db.query failed");
                ctx.json_parse("[]")
            }
        }
    })
}

// A single array argument is spread into positional parameters, so
// `db.query(sql, [1, 2])` and `db.query(sql, 1, 2)` are equivalent.
fn collect_params(args: Vec<Value<'_>>) -> rquickjs::Result<Vec<rusqlite::types::Value>> {
    if args.len() == 1
        && let Some(array) = args[0].as_array()
    {
        let mut params = Vec::with_capacity(array.len());
        for item in array.iter::<Value>() {
            params.push(to_sql(&item?)?);
        }
        return Ok(params);
    }
    args.iter().map(to_sql).collect()
}

fn to_sql(value: &Value<'_>) -> rquickjs::Result<rusqlite::types::Value> {
    use rusqlite::types::Value as Sql;

    if value.is_undefined() || value.is_null() {
        return Ok(Sql::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Sql::Integer(i64::from(b)));
    }
    if let Some(i) = value.as_int() {
        return Ok(Sql::Integer(i64::from(i)));
    }
    if let Some(f) = value.as_float() {
        return Ok(Sql::Real(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(Sql::Text(s.to_string()?));
    }
    if let Some(bytes) = value
        .as_object()
        .and_then(|obj| obj.as_typed_array::<u8>())
        .and_then(|array| array.as_bytes())
    {
        return Ok(Sql::Blob(bytes.to_vec()));
    }

    // Anything else (objects, arrays) is stored as its JSON text.
    let json = value
        .ctx()
        .json_stringify(value.clone())?
        .map(|s| s.to_string())
        .transpose()?
        .unwrap_or_default();
    Ok(Sql::Text(json))
}

fn run_query(
    shared: &RuntimeShared,
    sql: &str,
    params: Vec<rusqlite::types::Value>,
) -> rusqlite::Result<Vec<Json>> {
    let connection = shared.connection.lock();
    let mut statement = connection.prepare(sql)?;
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = statement.query(rusqlite::params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::with_capacity(columns.len());
        for (index, name) in columns.iter().enumerate() {
            object.insert(name.clone(), column_to_json(row.get_ref(index)?));
        }
        out.push(Json::Object(object));
    }
    Ok(out)
}

fn column_to_json(value: ValueRef<'_>) -> Json {
    match value {
        ValueRef::Null => Json::Null,
        ValueRef::Integer(i) => Json::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Json::Null, Json::Number),
        ValueRef::Text(text) => Json::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Json::String(BASE64.encode(blob)),
    }
}
