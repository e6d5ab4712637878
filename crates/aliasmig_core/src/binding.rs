//! Table-targeted access to an [`AliasService`].
//!
//! The alias service has one mutable active table. Every migration write goes
//! through [`TableScope`], which binds the requested table for the duration of
//! a single call and rebinds [`AliasTable::Live`] when dropped, including when
//! the call returns an error.

use std::ops::{Deref, DerefMut};

use anyhow::Result;
use serde::Serialize;

use crate::error::MigrationError;
use crate::services::{AliasService, AliasTable};

pub struct TableScope<'a, S: AliasService + ?Sized> {
    service: &'a mut S,
}

impl<'a, S: AliasService + ?Sized> TableScope<'a, S> {
    pub fn bind(service: &'a mut S, table: AliasTable) -> Self {
        service.set_active_table(table);
        Self { service }
    }
}

impl<S: AliasService + ?Sized> Deref for TableScope<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.service
    }
}

impl<S: AliasService + ?Sized> DerefMut for TableScope<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.service
    }
}

impl<S: AliasService + ?Sized> Drop for TableScope<'_, S> {
    fn drop(&mut self) {
        self.service.set_active_table(AliasTable::Live);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    Conflict,
}

/// Alias writes parameterized by target table.
pub struct MigrationAliases<'a, S: AliasService + ?Sized> {
    service: &'a mut S,
}

impl<'a, S: AliasService + ?Sized> MigrationAliases<'a, S> {
    pub fn new(service: &'a mut S) -> Self {
        Self { service }
    }

    pub fn publish(
        &mut self,
        table: AliasTable,
        location_id: i64,
        parent_location_id: i64,
        name: &str,
        language_code: &str,
        always_available: bool,
    ) -> Result<()> {
        let mut scope = TableScope::bind(&mut *self.service, table);
        scope.publish_location_alias(
            location_id,
            parent_location_id,
            name,
            language_code,
            always_available,
        )
    }

    pub fn create_custom(
        &mut self,
        table: AliasTable,
        location_id: i64,
        path: &str,
        forwarding: bool,
        language_code: &str,
        always_available: bool,
    ) -> Result<CreateOutcome> {
        let mut scope = TableScope::bind(&mut *self.service, table);
        classify(scope.create_custom_alias(
            location_id,
            path,
            forwarding,
            language_code,
            always_available,
        ))
    }

    pub fn create_global(
        &mut self,
        table: AliasTable,
        resource: &str,
        path: &str,
        forwarding: bool,
        language_code: &str,
        always_available: bool,
    ) -> Result<CreateOutcome> {
        let mut scope = TableScope::bind(&mut *self.service, table);
        classify(scope.create_global_alias(
            resource,
            path,
            forwarding,
            language_code,
            always_available,
        ))
    }
}

fn classify(result: Result<()>) -> Result<CreateOutcome> {
    match result {
        Ok(()) => Ok(CreateOutcome::Created),
        Err(error) => match error.downcast_ref::<MigrationError>() {
            Some(MigrationError::Forbidden(_)) => Ok(CreateOutcome::Conflict),
            _ => Err(error),
        },
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};

    use super::{CreateOutcome, MigrationAliases, TableScope};
    use crate::error::MigrationError;
    use crate::services::{AliasService, AliasTable, UrlAlias};

    #[derive(Default)]
    struct RecordingService {
        active: AliasTable,
        seen_tables: Vec<AliasTable>,
        fail_with: Option<MigrationError>,
        fail_hard: bool,
    }

    impl RecordingService {
        fn outcome(&mut self) -> Result<()> {
            self.seen_tables.push(self.active);
            if self.fail_hard {
                bail!("connection reset");
            }
            match self.fail_with.clone() {
                Some(error) => Err(error.into()),
                None => Ok(()),
            }
        }
    }

    impl AliasService for RecordingService {
        fn list_location_aliases(&mut self, _: i64, _: bool) -> Result<Vec<UrlAlias>> {
            Ok(Vec::new())
        }

        fn list_global_aliases(&mut self) -> Result<Vec<UrlAlias>> {
            Ok(Vec::new())
        }

        fn publish_location_alias(
            &mut self,
            _: i64,
            _: i64,
            _: &str,
            _: &str,
            _: bool,
        ) -> Result<()> {
            self.outcome()
        }

        fn create_custom_alias(
            &mut self,
            _: i64,
            _: &str,
            _: bool,
            _: &str,
            _: bool,
        ) -> Result<()> {
            self.outcome()
        }

        fn create_global_alias(
            &mut self,
            _: &str,
            _: &str,
            _: bool,
            _: &str,
            _: bool,
        ) -> Result<()> {
            self.outcome()
        }

        fn set_active_table(&mut self, table: AliasTable) {
            self.active = table;
        }

        fn active_table(&self) -> AliasTable {
            self.active
        }
    }

    #[test]
    fn scope_restores_live_table_on_drop() {
        let mut service = RecordingService::default();
        {
            let scope = TableScope::bind(&mut service, AliasTable::Migration);
            assert_eq!(scope.active_table(), AliasTable::Migration);
        }
        assert_eq!(service.active_table(), AliasTable::Live);
    }

    #[test]
    fn successful_create_targets_migration_then_rebinds_live() {
        let mut service = RecordingService::default();
        let outcome = MigrationAliases::new(&mut service)
            .create_custom(AliasTable::Migration, 42, "promo", false, "eng-GB", true)
            .expect("create");

        assert_eq!(outcome, CreateOutcome::Created);
        assert_eq!(service.seen_tables, vec![AliasTable::Migration]);
        assert_eq!(service.active_table(), AliasTable::Live);
    }

    #[test]
    fn forbidden_becomes_conflict_and_rebinds_live() {
        let mut service = RecordingService {
            fail_with: Some(MigrationError::Forbidden("path taken".to_string())),
            ..RecordingService::default()
        };
        let outcome = MigrationAliases::new(&mut service)
            .create_global(
                AliasTable::Migration,
                "module:content/search",
                "find",
                true,
                "eng-GB",
                false,
            )
            .expect("conflict is not an error");

        assert_eq!(outcome, CreateOutcome::Conflict);
        assert_eq!(service.active_table(), AliasTable::Live);
    }

    #[test]
    fn hard_failure_propagates_and_rebinds_live() {
        let mut service = RecordingService {
            fail_hard: true,
            ..RecordingService::default()
        };
        let mut aliases = MigrationAliases::new(&mut service);
        assert!(
            aliases
                .create_custom(AliasTable::Migration, 7, "x", false, "eng-GB", false)
                .is_err()
        );
        assert!(
            aliases
                .publish(AliasTable::Migration, 7, 1, "X", "eng-GB", false)
                .is_err()
        );
        drop(aliases);

        assert_eq!(
            service.seen_tables,
            vec![AliasTable::Migration, AliasTable::Migration]
        );
        assert_eq!(service.active_table(), AliasTable::Live);
    }

    #[test]
    fn other_typed_errors_are_not_conflicts() {
        let mut service = RecordingService {
            fail_with: Some(MigrationError::NotFound("location 7".to_string())),
            ..RecordingService::default()
        };
        let error = MigrationAliases::new(&mut service)
            .create_custom(AliasTable::Migration, 7, "x", false, "eng-GB", false)
            .expect_err("must fail");
        assert!(error.to_string().contains("location 7"));
        assert_eq!(service.active_table(), AliasTable::Live);
    }
}
