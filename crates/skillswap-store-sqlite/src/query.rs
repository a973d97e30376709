//! Translation of a [`Filter`] or a [`SkillQuery`] into SQL.

use rusqlite::types::Value;
use skillswap_core::{
  marketplace::SkillQuery,
  record::Table,
  remote::{Filter, Order},
};

/// A `WHERE` clause with its numbered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
  pub sql:    String,
  pub params: Vec<Value>,
}

fn bind(params: &mut Vec<Value>, value: &str) -> String {
  params.push(Value::Text(value.to_owned()));
  format!("?{}", params.len())
}

/// Build the predicate selecting the rows of `table` that `filter` matches.
///
/// Predicates that can never hold for the table (an owner on a two-party
/// table, a sender on a single-owner one) compile to `0`, matching nothing,
/// just as [`Filter::matches`] rejects them.
pub fn where_clause(table: Table, filter: &Filter) -> WhereClause {
  let mut conds: Vec<String> = Vec::new();
  let mut params: Vec<Value> = Vec::new();

  if let Some(id) = &filter.id {
    conds.push(format!("id = {}", bind(&mut params, id.as_str())));
  }
  if filter.unread_only {
    conds.push("read = 0".to_owned());
  }

  match table {
    Table::ChatMessages => {
      if filter.owner.is_some() {
        conds.push("0".to_owned());
      }
      if let Some(sender) = &filter.sender {
        conds.push(format!("sender_id = {}", bind(&mut params, sender.as_str())));
      }
      if let Some(receiver) = &filter.receiver {
        conds.push(format!(
          "receiver_id = {}",
          bind(&mut params, receiver.as_str())
        ));
      }
      for actor in &filter.involves {
        let p = bind(&mut params, actor.as_str());
        conds.push(format!("(sender_id = {p} OR receiver_id = {p})"));
      }
    }
    Table::Notifications => {
      if filter.sender.is_some() || filter.receiver.is_some() {
        conds.push("0".to_owned());
      }
      if let Some(owner) = &filter.owner {
        conds.push(format!("user_id = {}", bind(&mut params, owner.as_str())));
      }
      for actor in &filter.involves {
        conds.push(format!("user_id = {}", bind(&mut params, actor.as_str())));
      }
    }
  }

  let sql = if conds.is_empty() {
    "1".to_owned()
  } else {
    conds.join(" AND ")
  };
  WhereClause { sql, params }
}

/// Build the predicate over `skills` for a browse query.
///
/// SQLite's `lower` and `NOCASE` fold ASCII only, the same folding
/// [`SkillQuery::matches`] applies.
pub fn skill_where(query: &SkillQuery) -> WhereClause {
  let mut conds: Vec<String> = Vec::new();
  let mut params: Vec<Value> = Vec::new();

  if let Some(owner) = &query.owner {
    conds.push(format!("owner_id = {}", bind(&mut params, owner.as_str())));
  }
  if let Some(category) = &query.category {
    conds.push(format!(
      "category = {} COLLATE NOCASE",
      bind(&mut params, category.trim())
    ));
  }
  if let Some(level) = query.level {
    conds.push(format!("level = {}", bind(&mut params, &level.to_string())));
  }
  if let Some(needle) = query.needle() {
    let p = bind(&mut params, &needle);
    conds.push(format!(
      "(instr(lower(title), {p}) > 0 OR instr(lower(description), {p}) > 0)"
    ));
  }

  let sql = if conds.is_empty() {
    "1".to_owned()
  } else {
    conds.join(" AND ")
  };
  WhereClause { sql, params }
}

/// `ORDER BY` and `LIMIT` for `filter`; ties on `created_at` break on id.
pub fn order_clause(filter: &Filter) -> String {
  let dir = match filter.order {
    Order::Ascending => "ASC",
    Order::Descending => "DESC",
  };
  let mut sql = format!("ORDER BY created_at {dir}, id {dir}");
  if let Some(limit) = filter.limit {
    sql.push_str(&format!(" LIMIT {limit}"));
  }
  sql
}
