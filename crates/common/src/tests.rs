use super::*;

#[test]
fn page_zero_is_the_null_reference() {
    assert!(PageId::NONE.is_none());
    assert!(PageId(0).is_none());
    assert!(!PageId(1).is_none());
}

#[test]
fn config_builder_applies_defaults() {
    let config = Config::builder().build();
    assert_eq!(config.cache_pages, 64);
    assert_eq!(config.table_style, pretty::TableStyleKind::Modern);
}

#[test]
fn errors_render_with_kind_prefix() {
    let err = DbError::Schema("unknown table 'users'".into());
    assert_eq!(format!("{err}"), "schema: unknown table 'users'");

    let err = DbError::Constraint("duplicate primary key 7".into());
    assert!(format!("{err}").starts_with("constraint violation"));
}
