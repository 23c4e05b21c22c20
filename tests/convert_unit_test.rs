//! Translation pipeline tests through the public streaming interface.

use sqlite_restore::convert::{translate_stream, TranslationContext};

fn translate_all(dump: &str) -> (Vec<String>, TranslationContext) {
    let mut ctx = TranslationContext::new();
    let mut out = Vec::new();
    translate_stream(dump.as_bytes(), &mut ctx, |sql| {
        out.push(sql.to_string());
        Ok(())
    })
    .unwrap();
    (out, ctx)
}

#[test]
fn qualified_create_table_is_stripped_and_retyped() {
    let (out, _) = translate_all(
        "CREATE TABLE public.invoices (id integer NOT NULL, total numeric(10,2), paid boolean DEFAULT false);",
    );

    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with("CREATE TABLE invoices"));
    assert!(out[0].contains("total REAL"));
    assert!(out[0].contains("DEFAULT 0"));
    assert!(!out[0].to_lowercase().contains("public."));
}

#[test]
fn quoted_schema_qualifier_is_unquoted() {
    let (out, _) = translate_all("INSERT INTO \"public\".\"invoices\" (id) VALUES (1);");

    assert_eq!(out.len(), 1);
    assert!(out[0].contains("INSERT INTO invoices"));
}

#[test]
fn sequences_grants_and_session_config_are_discarded() {
    let dump = "\
SET statement_timeout = 0;
CREATE SEQUENCE public.invoices_id_seq START WITH 1;
ALTER TABLE ONLY public.invoices ADD CONSTRAINT invoices_pkey PRIMARY KEY (id);
GRANT ALL ON TABLE public.invoices TO admin;
COMMENT ON TABLE public.invoices IS 'billing';
SELECT pg_catalog.setval('public.invoices_id_seq', 42, true);
CREATE TABLE public.invoices (id integer);
";
    let (out, ctx) = translate_all(dump);

    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with("CREATE TABLE invoices"));
    assert_eq!(ctx.stats.statements_discarded, 6);
}

#[test]
fn index_with_storage_method_is_rewritten() {
    let (out, _) = translate_all(
        "CREATE INDEX idx_invoices_client ON public.invoices USING btree (client_id);",
    );

    assert_eq!(out, vec!["CREATE INDEX idx_invoices_client ON invoices (client_id);"]);
}

#[test]
fn unique_index_keeps_uniqueness() {
    let (out, _) = translate_all(
        "CREATE UNIQUE INDEX uq_clients_email ON public.clients USING btree (email);",
    );

    assert_eq!(out, vec!["CREATE UNIQUE INDEX uq_clients_email ON clients (email);"]);
}

#[test]
fn partial_index_predicate_is_dropped_with_warning() {
    let (out, ctx) = translate_all(
        "CREATE INDEX idx_open_debts ON public.debts USING btree (client_id) WHERE settled_at IS NULL;",
    );

    assert_eq!(out, vec!["CREATE INDEX idx_open_debts ON debts (client_id);"]);
    assert!(ctx.warnings.has_warnings());
}

#[test]
fn copy_block_becomes_batched_inserts() {
    let dump = "\
COPY public.clients (id, name, email) FROM stdin;
1\tAda\tada@example.com
2\t\\N\t\\N
\\.
";
    let (out, ctx) = translate_all(dump);

    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0],
        "INSERT INTO clients (id, name, email) VALUES (1,'Ada','ada@example.com'),(2,NULL,NULL);"
    );
    assert_eq!(ctx.stats.copy_rows_emitted, 2);
}

#[test]
fn malformed_copy_row_is_skipped_not_fatal() {
    let dump = "\
COPY public.clients (id, name) FROM stdin;
1\tAda
2\tBob\textra-field
3\tCleo
\\.
";
    let (out, ctx) = translate_all(dump);

    assert_eq!(out.len(), 1);
    assert!(out[0].contains("'Ada'"));
    assert!(out[0].contains("'Cleo'"));
    assert!(!out[0].contains("Bob"));
    assert_eq!(ctx.stats.copy_rows_emitted, 2);
    assert_eq!(ctx.stats.copy_rows_skipped, 1);
}

#[test]
fn copy_escapes_are_decoded_then_requoted() {
    let dump = "\
COPY public.notes (id, body) FROM stdin;
1\tline one\\nline two
2\tO'Brien
\\.
";
    let (out, _) = translate_all(dump);

    assert!(out[0].contains("'line one\nline two'"));
    assert!(out[0].contains("'O''Brien'"));
}

#[test]
fn statement_order_is_preserved() {
    let dump = "\
CREATE TABLE public.products (id integer, active boolean DEFAULT true);
COPY public.products (id, active) FROM stdin;
1\tt
\\.
CREATE INDEX idx_products_id ON public.products USING btree (id);
";
    let (out, _) = translate_all(dump);

    assert_eq!(out.len(), 3);
    assert!(out[0].starts_with("CREATE TABLE"));
    assert!(out[1].starts_with("INSERT INTO"));
    assert!(out[2].starts_with("CREATE INDEX"));
}

#[test]
fn every_translated_statement_executes_on_a_fresh_store() {
    let dump = "\
SET client_encoding = 'UTF8';
CREATE TABLE public.products (
    id integer NOT NULL,
    name character varying(120) NOT NULL,
    price numeric(10,2) DEFAULT 0,
    active boolean DEFAULT true,
    created_at timestamp without time zone
);
CREATE SEQUENCE public.products_id_seq;
ALTER TABLE ONLY public.products ADD CONSTRAINT products_pkey PRIMARY KEY (id);
COPY public.products (id, name, price, active, created_at) FROM stdin;
1\tKeyboard\t49.90\tt\t2024-01-05 10:00:00
2\tMouse\t\\N\tf\t\\N
\\.
CREATE UNIQUE INDEX products_name_key ON public.products USING btree (name);
SELECT pg_catalog.setval('public.products_id_seq', 2, true);
";
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let mut ctx = TranslationContext::new();
    translate_stream(dump.as_bytes(), &mut ctx, |sql| {
        conn.execute_batch(sql)
            .map_err(|e| anyhow::anyhow!("{} in: {}", e, sql))
    })
    .unwrap();

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 2);

    let price: Option<f64> = conn
        .query_row("SELECT price FROM products WHERE id = 2", [], |r| r.get(0))
        .unwrap();
    assert_eq!(price, None);
}
