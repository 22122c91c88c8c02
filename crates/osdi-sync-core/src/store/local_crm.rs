//! SQLite-backed local CRM.
//!
//! Holds contacts, tags, tag assignments and contributions in the shared
//! database and reports every committed write to an optional
//! [`ChangeListener`].

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Row};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{ChangeKind, ChangeListener, Filter, FilterOp, LocalChange, ObjectStore, WriteContext};
use crate::error::StoreError;
use crate::model::{Contact, Contribution, EntityKind, EntityTag, Field, LocalTag, SyncObject};
use crate::storage::{format_ts, parse_ts, Database};

/// Row mapping for one local table.
///
/// Rows are selected as `id, <COLUMNS...>, modified_date`.
pub trait LocalRecord: SyncObject {
    const KIND: EntityKind;
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const BOOL_COLUMNS: &'static [&'static str] = &[];

    fn from_row(row: &Row) -> rusqlite::Result<Self>;

    /// Values for `COLUMNS`, in order.
    fn values(&self) -> Vec<SqlValue>;
}

fn row_id(row: &Row) -> rusqlite::Result<Option<String>> {
    Ok(Some(row.get::<_, i64>(0)?.to_string()))
}

fn row_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_ts))
}

fn text(value: &Option<String>) -> SqlValue {
    value.clone().into()
}

impl LocalRecord for Contact {
    const KIND: EntityKind = EntityKind::Person;
    const TABLE: &'static str = "contact";
    const COLUMNS: &'static [&'static str] = &[
        "first_name",
        "last_name",
        "email",
        "phone",
        "street_address",
        "city",
        "state_province",
        "postal_code",
        "country",
        "is_opt_out",
        "do_not_email",
        "is_deleted",
    ];
    const BOOL_COLUMNS: &'static [&'static str] = &["is_opt_out", "do_not_email", "is_deleted"];

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row_id(row)?,
            first_name: Field::loaded(row.get(1)?),
            last_name: Field::loaded(row.get(2)?),
            email: Field::loaded(row.get(3)?),
            phone: Field::loaded(row.get(4)?),
            street_address: Field::loaded(row.get(5)?),
            city: Field::loaded(row.get(6)?),
            state_province: Field::loaded(row.get(7)?),
            postal_code: Field::loaded(row.get(8)?),
            country: Field::loaded(row.get(9)?),
            is_opt_out: Field::loaded(row.get(10)?),
            do_not_email: Field::loaded(row.get(11)?),
            is_deleted: Field::loaded(row.get(12)?),
            modified_date: row_ts(row, 13)?,
        })
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            text(self.first_name.get()),
            text(self.last_name.get()),
            text(self.email.get()),
            text(self.phone.get()),
            text(self.street_address.get()),
            text(self.city.get()),
            text(self.state_province.get()),
            text(self.postal_code.get()),
            text(self.country.get()),
            (*self.is_opt_out.get()).into(),
            (*self.do_not_email.get()).into(),
            (*self.is_deleted.get()).into(),
        ]
    }
}

impl LocalRecord for LocalTag {
    const KIND: EntityKind = EntityKind::Tag;
    const TABLE: &'static str = "tag";
    const COLUMNS: &'static [&'static str] = &["name", "description"];

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row_id(row)?,
            name: Field::loaded(row.get(1)?),
            description: Field::loaded(row.get(2)?),
            modified_date: row_ts(row, 3)?,
        })
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![self.name.get().clone().into(), text(self.description.get())]
    }
}

impl LocalRecord for EntityTag {
    const KIND: EntityKind = EntityKind::Tagging;
    const TABLE: &'static str = "entity_tag";
    const COLUMNS: &'static [&'static str] = &["contact_id", "tag_id"];

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row_id(row)?,
            contact_id: Field::loaded(row.get(1)?),
            tag_id: Field::loaded(row.get(2)?),
            modified_date: row_ts(row, 3)?,
        })
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.contact_id.get().clone().into(),
            self.tag_id.get().clone().into(),
        ]
    }
}

impl LocalRecord for Contribution {
    const KIND: EntityKind = EntityKind::Donation;
    const TABLE: &'static str = "contribution";
    const COLUMNS: &'static [&'static str] = &[
        "contact_id",
        "total_amount",
        "currency",
        "receive_date",
        "financial_type",
        "status",
    ];

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row_id(row)?,
            contact_id: Field::loaded(row.get(1)?),
            total_amount: Field::loaded(row.get(2)?),
            currency: Field::loaded(row.get(3)?),
            receive_date: Field::loaded(row_ts(row, 4)?),
            financial_type: Field::loaded(row.get(5)?),
            status: Field::loaded(row.get(6)?),
            modified_date: row_ts(row, 7)?,
        })
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.contact_id.get().clone().into(),
            self.total_amount.get().clone().into(),
            self.currency.get().clone().into(),
            (*self.receive_date.get()).map(format_ts).into(),
            self.financial_type.get().clone().into(),
            self.status.get().clone().into(),
        ]
    }
}

pub struct LocalCrm {
    db: Rc<Database>,
    listener: RefCell<Option<Rc<dyn ChangeListener>>>,
    last_stamp: Cell<Option<DateTime<Utc>>>,
}

impl LocalCrm {
    pub fn new(db: Rc<Database>) -> Self {
        Self {
            db,
            listener: RefCell::new(None),
            last_stamp: Cell::new(None),
        }
    }

    /// Register the observer notified after every committed write.
    pub fn set_listener(&self, listener: Rc<dyn ChangeListener>) {
        *self.listener.borrow_mut() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.listener.borrow_mut() = None;
    }

    /// Mark a contact deleted without removing the row.
    pub fn soft_delete_contact(&self, id: &str, ctx: &WriteContext) -> Result<(), StoreError> {
        let mut contact: Contact = self
            .fetch(id)?
            .ok_or_else(|| StoreError::not_found(Contact::TABLE, id))?;
        contact.is_deleted.set(true);
        self.save(&mut contact, ctx)
    }

    /// Strictly increasing modification stamps at the stored precision.
    fn next_stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let stamp = match self.last_stamp.get() {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp.set(Some(stamp));
        stamp
    }

    fn notify(&self, kind: EntityKind, local_id: &str, change: ChangeKind, ctx: &WriteContext) {
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener {
            listener.on_local_change(
                &LocalChange {
                    kind,
                    local_id: local_id.to_string(),
                    change,
                },
                ctx,
            );
        }
    }

    fn select_sql<T: LocalRecord>() -> String {
        format!(
            "SELECT id, {}, modified_date FROM {}",
            T::COLUMNS.join(", "),
            T::TABLE
        )
    }

    fn query<T: LocalRecord>(&self, sql: &str, args: Vec<SqlValue>) -> Result<Vec<T>, StoreError> {
        let mut stmt = self.db.conn().prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| T::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Translate filters into a WHERE clause over whitelisted columns.
    fn where_clause<T: LocalRecord>(filters: &[Filter]) -> Result<(String, Vec<SqlValue>), StoreError> {
        let mut clauses = Vec::with_capacity(filters.len());
        let mut args = Vec::with_capacity(filters.len());
        for filter in filters {
            let column = filter.field.as_str();
            if column != "id" && column != "modified_date" && !T::COLUMNS.contains(&column) {
                return Err(StoreError::Invalid(format!(
                    "cannot filter {} by '{}'",
                    T::TABLE,
                    column
                )));
            }

            let value: SqlValue = if T::BOOL_COLUMNS.contains(&column) {
                match filter.value.as_str() {
                    "1" | "true" => SqlValue::Integer(1),
                    "0" | "false" => SqlValue::Integer(0),
                    other => {
                        return Err(StoreError::Invalid(format!(
                            "'{other}' is not a boolean for {column}"
                        )))
                    }
                }
            } else if column == "id" {
                let id = filter.value.parse::<i64>().map_err(|_| {
                    StoreError::Invalid(format!("'{}' is not a local id", filter.value))
                })?;
                SqlValue::Integer(id)
            } else {
                match parse_ts(&filter.value) {
                    Some(ts) => SqlValue::Text(format_ts(ts)),
                    None => SqlValue::Text(filter.value.clone()),
                }
            };

            clauses.push(match filter.op {
                FilterOp::Eq => format!("{column} = ?"),
                FilterOp::EqIgnoreCase => format!("{column} = ? COLLATE NOCASE"),
                FilterOp::Lt => format!("{column} < ?"),
                FilterOp::Gt => format!("{column} > ?"),
            });
            args.push(value);
        }

        if clauses.is_empty() {
            Ok((String::new(), args))
        } else {
            Ok((format!(" WHERE {}", clauses.join(" AND ")), args))
        }
    }
}

impl<T: LocalRecord> ObjectStore<T> for LocalCrm {
    fn fetch(&self, id: &str) -> Result<Option<T>, StoreError> {
        let Ok(rowid) = id.parse::<i64>() else {
            return Ok(None);
        };
        let sql = format!("{} WHERE id = ?1", Self::select_sql::<T>());
        Ok(self.query::<T>(&sql, vec![SqlValue::Integer(rowid)])?.into_iter().next())
    }

    fn find(&self, filters: &[Filter]) -> Result<Vec<T>, StoreError> {
        let (clause, args) = Self::where_clause::<T>(filters)?;
        let sql = format!("{}{} ORDER BY id", Self::select_sql::<T>(), clause);
        self.query(&sql, args)
    }

    fn modified_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<T>, StoreError> {
        let base = Self::select_sql::<T>();
        match since {
            Some(since) => self.query(
                &format!("{base} WHERE modified_date > ?1 ORDER BY modified_date, id"),
                vec![SqlValue::Text(format_ts(since))],
            ),
            None => self.query(&format!("{base} ORDER BY modified_date, id"), Vec::new()),
        }
    }

    fn save(&self, object: &mut T, ctx: &WriteContext) -> Result<(), StoreError> {
        let stamp = self.next_stamp();
        let mut args = object.values();
        args.push(SqlValue::Text(format_ts(stamp)));

        let change = match object.id().map(str::to_string) {
            Some(id) => {
                let assignments = T::COLUMNS
                    .iter()
                    .map(|c| format!("{c} = ?"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let rowid = id
                    .parse::<i64>()
                    .map_err(|_| StoreError::Invalid(format!("'{id}' is not a local id")))?;
                args.push(SqlValue::Integer(rowid));
                let updated = self.db.conn().execute(
                    &format!(
                        "UPDATE {} SET {assignments}, modified_date = ? WHERE id = ?",
                        T::TABLE
                    ),
                    params_from_iter(args.iter()),
                )?;
                if updated == 0 {
                    return Err(StoreError::not_found(T::TABLE, id));
                }
                ChangeKind::Updated
            }
            None => {
                let placeholders = vec!["?"; T::COLUMNS.len() + 1].join(", ");
                self.db.conn().execute(
                    &format!(
                        "INSERT INTO {} ({}, modified_date) VALUES ({placeholders})",
                        T::TABLE,
                        T::COLUMNS.join(", ")
                    ),
                    params_from_iter(args.iter()),
                )?;
                object.set_id(self.db.conn().last_insert_rowid().to_string());
                ChangeKind::Created
            }
        };

        object.set_modified_date(stamp);
        object.mark_saved();
        if let Some(id) = object.id() {
            self.notify(T::KIND, id, change, ctx);
        }
        Ok(())
    }

    fn delete(&self, id: &str, ctx: &WriteContext) -> Result<(), StoreError> {
        let rowid = id
            .parse::<i64>()
            .map_err(|_| StoreError::Invalid(format!("'{id}' is not a local id")))?;
        let deleted = self
            .db
            .conn()
            .execute(&format!("DELETE FROM {} WHERE id = ?1", T::TABLE), params![rowid])?;
        if deleted == 0 {
            return Err(StoreError::not_found(T::TABLE, id));
        }
        self.notify(T::KIND, id, ChangeKind::Deleted, ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Recorder(RefCell<Vec<(LocalChange, bool)>>);

    impl ChangeListener for Recorder {
        fn on_local_change(&self, change: &LocalChange, ctx: &WriteContext) {
            self.0.borrow_mut().push((change.clone(), ctx.is_sync_engine()));
        }
    }

    fn crm() -> LocalCrm {
        LocalCrm::new(Rc::new(Database::open_memory().unwrap()))
    }

    #[test]
    fn contact_create_fetch_update() {
        let crm = crm();
        let ctx = WriteContext::user();
        let mut contact = Contact::new("Fizz", "Bang", "a@x.com");
        crm.save(&mut contact, &ctx).unwrap();
        let id = contact.id().unwrap().to_string();
        assert!(!contact.is_altered());
        let first_stamp = contact.modified_date.unwrap();

        let mut loaded: Contact = crm.fetch(&id).unwrap().unwrap();
        assert_eq!(loaded.email.get().as_deref(), Some("a@x.com"));
        assert!(!loaded.is_altered());

        loaded.phone.set(Some("555-0100".into()));
        crm.save(&mut loaded, &ctx).unwrap();
        let reloaded: Contact = crm.fetch(&id).unwrap().unwrap();
        assert_eq!(reloaded.phone.get().as_deref(), Some("555-0100"));
        assert!(reloaded.modified_date.unwrap() > first_stamp);
    }

    #[test]
    fn find_by_email_ignores_case() {
        let crm = crm();
        let ctx = WriteContext::user();
        crm.save(&mut Contact::new("A", "One", "Dup@X.com"), &ctx).unwrap();
        crm.save(&mut Contact::new("B", "Two", "dup@x.com"), &ctx).unwrap();
        crm.save(&mut Contact::new("C", "Three", "other@x.com"), &ctx).unwrap();

        let found: Vec<Contact> = crm.find(&[Filter::eq_ignore_case("email", "DUP@x.com")]).unwrap();
        assert_eq!(found.len(), 2);
        let refined: Vec<Contact> = crm
            .find(&[
                Filter::eq_ignore_case("email", "dup@x.com"),
                Filter::eq_ignore_case("first_name", "b"),
            ])
            .unwrap();
        assert_eq!(refined.len(), 1);
    }

    #[test]
    fn find_rejects_unknown_columns() {
        let crm = crm();
        let result: Result<Vec<Contact>, _> = crm.find(&[Filter::eq("password", "x")]);
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[test]
    fn modified_since_orders_oldest_first() {
        let crm = crm();
        let ctx = WriteContext::user();
        let mut a = LocalTag::new("a");
        let mut b = LocalTag::new("b");
        crm.save(&mut a, &ctx).unwrap();
        crm.save(&mut b, &ctx).unwrap();

        let all: Vec<LocalTag> = crm.modified_since(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name.get(), "a");

        let after_a: Vec<LocalTag> = crm.modified_since(a.modified_date).unwrap();
        assert_eq!(after_a.len(), 1);
        assert_eq!(after_a[0].name.get(), "b");
    }

    #[test]
    fn contribution_roundtrip_keeps_receive_date() {
        let crm = crm();
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let mut c = Contribution::new("1", "25.00", when);
        crm.save(&mut c, &WriteContext::user()).unwrap();
        let loaded: Contribution = crm.fetch(c.id().unwrap()).unwrap().unwrap();
        assert_eq!(*loaded.receive_date.get(), Some(when));
        assert!(loaded.is_completed());
    }

    #[test]
    fn listener_sees_writes_with_context() {
        let crm = crm();
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        crm.set_listener(recorder.clone());

        let mut contact = Contact::new("Fizz", "Bang", "a@x.com");
        crm.save(&mut contact, &WriteContext::user()).unwrap();
        let id = contact.id().unwrap().to_string();
        crm.soft_delete_contact(&id, &WriteContext::sync_engine(1)).unwrap();
        ObjectStore::<Contact>::delete(&crm, &id, &WriteContext::user()).unwrap();

        let seen = recorder.0.borrow();
        let kinds: Vec<_> = seen.iter().map(|(c, _)| c.change).collect();
        assert_eq!(kinds, vec![ChangeKind::Created, ChangeKind::Updated, ChangeKind::Deleted]);
        assert!(!seen[0].1);
        assert!(seen[1].1);
        assert!(seen.iter().all(|(c, _)| c.kind == EntityKind::Person && c.local_id == id));
    }

    #[test]
    fn delete_missing_row_is_not_found() {
        let crm = crm();
        let err = ObjectStore::<LocalTag>::delete(&crm, "99", &WriteContext::user()).unwrap_err();
        assert!(err.is_not_found());
        let missing: Option<LocalTag> = crm.fetch("not-a-number").unwrap();
        assert!(missing.is_none());
    }
}
