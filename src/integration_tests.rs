//! End-to-end tests over the mock blob client and an in-memory catalog.

use std::sync::Arc;

use serde_json::Value;

use crate::build::build_index;
use crate::catalog::{Catalog, IndexSpec};
use crate::config::Config;
use crate::error::BioIndexError;
use crate::locus::{GeneResolver, Region};
use crate::query::{fetch_page, plan_all, plan_query, QueryCursor};
use crate::stats;
use crate::store::mock::MockBlobClient;
use crate::store::RecordStore;

struct Fixture {
    catalog: Catalog,
    client: Arc<MockBlobClient>,
    config: Config,
}

impl Fixture {
    async fn new(schema: &str, objects: &[(&str, &str)]) -> Fixture {
        let catalog = Catalog::connect("sqlite::memory:").await.unwrap();
        let spec = IndexSpec::new("test", "t/", schema).unwrap();
        catalog.put(&spec).await.unwrap();

        let client = Arc::new(MockBlobClient::new());
        for (key, data) in objects {
            client.put(*key, data.to_string());
        }

        Fixture {
            catalog,
            client,
            config: Config::new("bucket", "sqlite::memory:").with_workers(2),
        }
    }

    async fn build(&self) -> crate::error::Result<crate::build::BuildSummary> {
        build_index(&self.catalog, self.client.clone(), &self.config, "test").await
    }

    async fn store(&self) -> RecordStore {
        let spec = self.catalog.get("test").await.unwrap();
        RecordStore::new(self.client.clone(), spec.compressed)
    }

    /// Run a query to exhaustion with a given per-page byte budget,
    /// returning all records and the number of pages it took.
    async fn query_paged(
        &self,
        q: &[&str],
        budget: u64,
    ) -> crate::error::Result<(Vec<Value>, u32)> {
        let spec = self.catalog.get("test").await?;
        let q: Vec<String> = q.iter().map(|s| s.to_string()).collect();
        let plan = plan_query(self.catalog.pool(), &spec, &q, None, self.config.stitch_gap).await?;

        let store = self.store().await;
        let mut cursor = Some(QueryCursor::new("test", plan));
        let mut records = Vec::new();
        let mut pages = 0;

        while let Some(current) = cursor.take() {
            let page = fetch_page(&store, current, budget).await?;
            pages = page.page;
            records.extend(page.records);
            cursor = page.cursor;
        }
        Ok((records, pages))
    }

    async fn query(&self, q: &[&str]) -> crate::error::Result<Vec<Value>> {
        Ok(self.query_paged(q, u64::MAX).await?.0)
    }

    async fn count(&self, q: &[&str]) -> u64 {
        let spec = self.catalog.get("test").await.unwrap();
        let q: Vec<String> = q.iter().map(|s| s.to_string()).collect();
        let plan = if q.is_empty() {
            plan_all(self.catalog.pool(), &spec).await.unwrap()
        } else {
            plan_query(self.catalog.pool(), &spec, &q, None, 0)
                .await
                .unwrap()
        };
        stats::count(
            &self.store().await,
            "test",
            plan,
            self.config.sample_limit,
        )
        .await
        .unwrap()
    }
}

// Scenario A: exact index over variant ids.
#[tokio::test]
async fn test_exact_index_lookup() {
    let fixture = Fixture::new(
        "varId",
        &[(
            "t/part-1.json",
            "{\"varId\":\"8:1:A:T\",\"beta\":0.1}\n{\"varId\":\"8:2:C:G\",\"beta\":0.2}\n",
        )],
    )
    .await;
    fixture.build().await.unwrap();

    let records = fixture.query(&["8:1:A:T"]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["varId"], "8:1:A:T");
    assert_eq!(records[0]["beta"], 0.1);

    assert_eq!(fixture.count(&["8:1:A:T"]).await, 1);

    let spec = fixture.catalog.get("test").await.unwrap();
    let keys = stats::match_keys(fixture.catalog.pool(), &spec, "8:", 100)
        .await
        .unwrap();
    assert_eq!(keys, vec!["8:1:A:T", "8:2:C:G"]);

    // the listing is bounded by the match limit
    let keys = stats::match_keys(fixture.catalog.pool(), &spec, "8:", 1)
        .await
        .unwrap();
    assert_eq!(keys, vec!["8:1:A:T"]);
}

// Scenario B: key + single-position locus.
#[tokio::test]
async fn test_key_and_position_query() {
    let fixture = Fixture::new(
        "phenotype,chromosome:position",
        &[(
            "t/part-1.json",
            "{\"phenotype\":\"BMI\",\"chromosome\":\"8\",\"position\":150}\n\
             {\"phenotype\":\"T2D\",\"chromosome\":\"8\",\"position\":100}\n\
             {\"phenotype\":\"T2D\",\"chromosome\":\"8\",\"position\":200}\n",
        )],
    )
    .await;
    fixture.build().await.unwrap();

    // only the T2D record at position 100 falls inside 8:50-150
    let records = fixture.query(&["T2D", "8:50-150"]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["position"], 100);

    // without a locus the key alone matches both T2D records
    let records = fixture.query(&["T2D"]).await.unwrap();
    assert_eq!(records.len(), 2);
}

// Scenario C: overlapping region index.
#[tokio::test]
async fn test_region_overlap_query() {
    let fixture = Fixture::new(
        "phenotype,chromosome:start-end",
        &[(
            "t/part-1.json",
            "{\"phenotype\":\"T2D\",\"chromosome\":\"8\",\"start\":100,\"end\":300}\n",
        )],
    )
    .await;
    fixture.build().await.unwrap();

    // the query region overlaps the record's [100, 300)
    let records = fixture.query(&["T2D", "8:200-250"]).await.unwrap();
    assert_eq!(records.len(), 1);

    // disjoint region returns nothing
    let records = fixture.query(&["T2D", "8:400-500"]).await.unwrap();
    assert!(records.is_empty());
}

// Scenario D: continuations cover the full result exactly once.
#[tokio::test]
async fn test_continuation_chain_is_lossless() {
    let lines: String = (0..200)
        .map(|i| {
            format!(
                "{{\"phenotype\":\"T2D\",\"chromosome\":\"8\",\"position\":{},\"n\":{}}}\n",
                i + 1,
                i
            )
        })
        .collect();
    let fixture = Fixture::new("phenotype,chromosome:position", &[("t/part-1.json", &lines)]).await;
    fixture.build().await.unwrap();

    let (unbounded, pages) = fixture.query_paged(&["T2D"], u64::MAX).await.unwrap();
    assert_eq!(pages, 1);
    assert_eq!(unbounded.len(), 200);

    // a budget far below the total forces a chain of continuations
    let (chained, pages) = fixture.query_paged(&["T2D"], 500).await.unwrap();
    assert!(pages > 1);
    assert_eq!(chained.len(), unbounded.len());
    for (a, b) in chained.iter().zip(unbounded.iter()) {
        assert_eq!(a, b);
    }

    // emitted in source order
    for (i, record) in chained.iter().enumerate() {
        assert_eq!(record["n"], i as u64);
    }
}

// Scenario E: a failed build is restartable and converges on the clean
// result.
#[tokio::test]
async fn test_build_restart_converges() {
    let good = "{\"varId\":\"a\"}\n{\"varId\":\"b\"}\n";
    let fixture = Fixture::new(
        "varId",
        &[
            ("t/part-1.json", good),
            ("t/part-2.json", "{\"varId\":\"c\"}\ngarbage line\n"),
        ],
    )
    .await;

    // first pass aborts on the corrupt object
    let error = fixture.build().await.unwrap_err();
    assert!(matches!(error, BioIndexError::BuildFailed { .. }));
    assert!(!fixture.catalog.get("test").await.unwrap().built);

    // repair the shard and build again
    fixture
        .client
        .put("t/part-2.json", "{\"varId\":\"c\"}\n{\"varId\":\"d\"}\n");
    fixture.build().await.unwrap();

    // the result equals a clean build of the same data
    let clean = Fixture::new(
        "varId",
        &[
            ("t/part-1.json", good),
            ("t/part-2.json", "{\"varId\":\"c\"}\n{\"varId\":\"d\"}\n"),
        ],
    )
    .await;
    clean.build().await.unwrap();

    for fx in [&fixture, &clean] {
        assert!(fx.catalog.get("test").await.unwrap().built);
    }
    assert_eq!(
        fixture.query(&["c"]).await.unwrap(),
        clean.query(&["c"]).await.unwrap()
    );
    assert_eq!(fixture.count(&[]).await, clean.count(&[]).await);
}

// Scenario F: a compressed index returns identical records.
#[tokio::test]
async fn test_compressed_index_round_trip() {
    let lines: String = (0..50)
        .map(|i| {
            format!(
                "{{\"phenotype\":\"T2D\",\"chromosome\":\"8\",\"position\":{}}}\n",
                i + 1
            )
        })
        .collect();

    // plain build first, for the expected answer
    let plain = Fixture::new("phenotype,chromosome:position", &[("t/part-1.json", &lines)]).await;
    plain.build().await.unwrap();
    let expected = plain.query(&["T2D", "8:10-20"]).await.unwrap();
    assert!(!expected.is_empty());

    // same shard compressed into small BGZF blocks with a .gzi sibling
    let (gz, gzi) = crate::store::bgzf::writer::compress(lines.as_bytes(), 128);
    let compressed = Fixture::new("phenotype,chromosome:position", &[]).await;
    compressed.client.put("t/part-1.json.gz", gz);
    compressed.client.put("t/part-1.json.gz.gzi", gzi);
    compressed
        .catalog
        .set_compressed("test", true)
        .await
        .unwrap();

    compressed.build().await.unwrap();
    assert_eq!(compressed.query(&["T2D", "8:10-20"]).await.unwrap(), expected);
    assert_eq!(
        compressed.query(&["T2D"]).await.unwrap(),
        plain.query(&["T2D"]).await.unwrap()
    );
}

// Invariant 6: interchangeable keys answer under every alternative.
#[tokio::test]
async fn test_interchangeable_key_queries() {
    let fixture = Fixture::new(
        "varId|dbSNP",
        &[(
            "t/part-1.json",
            "{\"varId\":\"8:1:A:T\",\"dbSNP\":null}\n{\"varId\":\"8:2:C:G\",\"dbSNP\":\"rs22\"}\n",
        )],
    )
    .await;
    fixture.build().await.unwrap();

    // a record with only varId set is found by varId
    let records = fixture.query(&["8:1:A:T"]).await.unwrap();
    assert_eq!(records.len(), 1);

    // a record with both set is found by either value
    let by_var = fixture.query(&["8:2:C:G"]).await.unwrap();
    let by_rs = fixture.query(&["rs22"]).await.unwrap();
    assert_eq!(by_var, by_rs);
    assert_eq!(by_var.len(), 1);
}

// Count extrapolates from a sample when the plan is larger than it.
#[tokio::test]
async fn test_count_estimate_within_tolerance() {
    let lines: String = (0..400)
        .map(|i| format!("{{\"varId\":\"8:{}:A:T\",\"pad\":\"xxxxxxxx\"}}\n", i))
        .collect();
    let fixture = Fixture::new("varId", &[("t/part-1.json", &lines)]).await;
    fixture.build().await.unwrap();

    let spec = fixture.catalog.get("test").await.unwrap();
    let plan = plan_all(fixture.catalog.pool(), &spec).await.unwrap();

    // a 40-record sample of uniform records estimates the total closely
    let estimate = stats::count(&fixture.store().await, "test", plan, 40)
        .await
        .unwrap();
    assert!((360..=440).contains(&estimate), "estimate {}", estimate);
}

// Gene-name loci resolve through the collaborator.
#[tokio::test]
async fn test_gene_name_query() {
    struct OneGene;
    impl GeneResolver for OneGene {
        fn resolve(&self, name: &str) -> Option<Region> {
            name.eq_ignore_ascii_case("slc30a8").then(|| Region {
                chromosome: "8".to_string(),
                start: 100,
                end: 200,
            })
        }
    }

    let fixture = Fixture::new(
        "phenotype,chromosome:position",
        &[(
            "t/part-1.json",
            "{\"phenotype\":\"T2D\",\"chromosome\":\"8\",\"position\":150}\n\
             {\"phenotype\":\"T2D\",\"chromosome\":\"8\",\"position\":500}\n",
        )],
    )
    .await;
    fixture.build().await.unwrap();

    let spec = fixture.catalog.get("test").await.unwrap();
    let q = vec!["T2D".to_string(), "SLC30A8".to_string()];

    let plan = plan_query(fixture.catalog.pool(), &spec, &q, Some(&OneGene), 0)
        .await
        .unwrap();
    let page = fetch_page(
        &fixture.store().await,
        QueryCursor::new("test", plan),
        u64::MAX,
    )
    .await
    .unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0]["position"], 150);

    // unknown genes fail the parse
    let q = vec!["T2D".to_string(), "NOPE".to_string()];
    assert!(matches!(
        plan_query(fixture.catalog.pool(), &spec, &q, Some(&OneGene), 0).await,
        Err(BioIndexError::UnknownLocus { .. })
    ));
}

// Arity is validated before planning.
#[tokio::test]
async fn test_arity_validation() {
    let fixture = Fixture::new(
        "phenotype,chromosome:position",
        &[(
            "t/part-1.json",
            "{\"phenotype\":\"T2D\",\"chromosome\":\"8\",\"position\":1}\n",
        )],
    )
    .await;
    fixture.build().await.unwrap();

    assert!(matches!(
        fixture.query(&[]).await,
        Err(BioIndexError::ArityMismatch { .. })
    ));
    assert!(matches!(
        fixture.query(&["T2D", "8:1", "extra"]).await,
        Err(BioIndexError::ArityMismatch { .. })
    ));
}

// Queries against an unbuilt index are rejected.
#[tokio::test]
async fn test_unbuilt_index_rejected() {
    let fixture = Fixture::new("varId", &[("t/part-1.json", "{\"varId\":\"a\"}\n")]).await;

    assert!(matches!(
        fixture.query(&["a"]).await,
        Err(BioIndexError::IndexNotBuilt { .. })
    ));
}
