//! Structured table queries and their `PostgREST` query-string encoding.

use std::fmt::Write as _;

use serde_json::Value;

/// Render a JSON value the way it appears in a filter or a query string.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// A row filter. Values are compared as text, the way the data API does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq { column: String, value: String },
    Neq { column: String, value: String },
    In { column: String, values: Vec<String> },
    IsNull { column: String },
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Self::Eq {
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    pub fn neq(column: &str, value: impl ToString) -> Self {
        Self::Neq {
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    pub fn is_in<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Self::In {
            column: column.to_string(),
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    #[must_use]
    pub fn is_null(column: &str) -> Self {
        Self::IsNull {
            column: column.to_string(),
        }
    }

    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Eq { column, .. }
            | Self::Neq { column, .. }
            | Self::In { column, .. }
            | Self::IsNull { column } => column,
        }
    }

    /// The query-string pair, e.g. `("user_id", "eq.42")`.
    #[must_use]
    pub fn to_param(&self) -> (String, String) {
        let operand = match self {
            Self::Eq { value, .. } => format!("eq.{value}"),
            Self::Neq { value, .. } => format!("neq.{value}"),
            Self::In { values, .. } => {
                let quoted: Vec<String> = values.iter().map(|v| quote_list_item(v)).collect();
                format!("in.({})", quoted.join(","))
            }
            Self::IsNull { .. } => "is.null".to_string(),
        };
        (self.column().to_string(), operand)
    }

    /// Evaluate against a row.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Self::Eq { value, .. } => !cell.is_null() && value_text(cell) == *value,
            Self::Neq { value, .. } => !cell.is_null() && value_text(cell) != *value,
            Self::In { values, .. } => {
                !cell.is_null() && values.iter().any(|v| *v == value_text(cell))
            }
            Self::IsNull { .. } => cell.is_null(),
        }
    }
}

fn quote_list_item(value: &str) -> String {
    if value.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

impl Order {
    #[must_use]
    pub fn to_param(&self) -> String {
        format!(
            "{}.{}",
            self.column,
            if self.descending { "desc" } else { "asc" }
        )
    }
}

/// One entry of a column selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    /// `*`
    All,
    Column(String),
    /// A related table resolved through a declared foreign key.
    Embed { relation: String, select: Select },
}

/// A column selection with embedded relations, e.g.
/// `*, products(name, price, product_images(image_url, is_primary))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub items: Vec<SelectItem>,
}

impl Default for Select {
    fn default() -> Self {
        Self::all()
    }
}

impl Select {
    #[must_use]
    pub fn all() -> Self {
        Self {
            items: vec![SelectItem::All],
        }
    }

    /// Parse the data API's select syntax. Whitespace is ignored and an
    /// unbalanced group is closed at the end of input.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        let mut chars = compact.chars().peekable();
        let select = Self::parse_group(&mut chars);
        if select.items.is_empty() {
            Self::all()
        } else {
            select
        }
    }

    fn parse_group(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Self {
        let mut items = Vec::new();
        let mut name = String::new();
        while let Some(c) = chars.next() {
            match c {
                ',' => push_item(&mut items, &mut name),
                '(' => {
                    let select = Self::parse_group(chars);
                    items.push(SelectItem::Embed {
                        relation: std::mem::take(&mut name),
                        select,
                    });
                    if chars.peek() == Some(&',') {
                        chars.next();
                    }
                }
                ')' => break,
                _ => name.push(c),
            }
        }
        push_item(&mut items, &mut name);
        Self { items }
    }

    /// Render back to the select syntax.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            match item {
                SelectItem::All => out.push('*'),
                SelectItem::Column(name) => out.push_str(name),
                SelectItem::Embed { relation, select } => {
                    let _ = write!(out, "{relation}({})", select.render());
                }
            }
        }
        out
    }

    /// Whether every column is selected at this level.
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.items.iter().any(|item| matches!(item, SelectItem::All))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            SelectItem::Column(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn embeds(&self) -> impl Iterator<Item = (&str, &Self)> {
        self.items.iter().filter_map(|item| match item {
            SelectItem::Embed { relation, select } => Some((relation.as_str(), select)),
            _ => None,
        })
    }
}

fn push_item(items: &mut Vec<SelectItem>, name: &mut String) {
    let name = std::mem::take(name);
    match name.as_str() {
        "" => {}
        "*" => items.push(SelectItem::All),
        _ => items.push(SelectItem::Column(name)),
    }
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub select: Select,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    /// Select every column of `table`.
    #[must_use]
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            select: Select::all(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    #[must_use]
    pub fn select(mut self, select: &str) -> Self {
        self.select = Select::parse(select);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn eq(self, column: &str, value: impl ToString) -> Self {
        self.filter(Filter::eq(column, value))
    }

    #[must_use]
    pub fn order_desc(mut self, column: &str) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            descending: true,
        });
        self
    }

    #[must_use]
    pub fn order_asc(mut self, column: &str) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            descending: false,
        });
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query-string pairs for `GET /rest/v1/{table}`.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select.render())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if !self.order.is_empty() {
            let order: Vec<String> = self.order.iter().map(Order::to_param).collect();
            params.push(("order".to_string(), order.join(",")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}
