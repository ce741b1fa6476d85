//! End-to-end assignment over a handcrafted six-page wiki.
//!
//! Categories Two, Three and Four and articles Five, Six and Seven are wired
//! so that every even page ends up in topic 0 and every odd page in topic 1.

use tokio_util::sync::CancellationToken;

use wikitopics::dump::MemoryDumps;
use wikitopics::types::TopicAssignments;
use wikitopics::{assign, Assignment};

fn fixture_dumps(with_pagelinks: bool) -> MemoryDumps {
    let mut dumps = MemoryDumps::new();
    dumps.insert(
        "pagetable",
        "2,14,Two,x,x,0\n\
         3,14,Three,x,x,0\n\
         4,14,Four,x,x,0\n\
         5,0,Five,x,x,0\n\
         6,0,Six,x,x,0\n\
         7,0,Seven,x,x,0\n",
    );
    dumps.insert("redirecttable", "");
    dumps.insert(
        "categorylinkstable",
        "2,Four\n3,Four\n4,Two\n5,Three\n6,Two\n6,Four\n7,Three\n7,Four\n",
    );
    dumps.insert(
        "pagelinkstable",
        if with_pagelinks {
            "5,0,Seven,0\n7,0,Five,0\n"
        } else {
            ""
        },
    );
    dumps
}

fn seeds() -> TopicAssignments {
    let mut topics = TopicAssignments::new();
    topics.insert(0, vec![2, 4]);
    topics.insert(1, vec![3, 4, 7]);
    topics
}

fn run(dumps: &MemoryDumps) -> Assignment {
    let tmp = tempfile::tempdir().expect("tempdir");
    assign(
        &CancellationToken::new(),
        tmp.path(),
        dumps,
        &seeds(),
        &[],
    )
    .expect("assignment")
}

#[test]
fn the_parity_of_an_id_decides_its_topic() {
    let assignment = run(&fixture_dumps(true));
    assert_eq!(assignment.page2topic.len(), 8);
    for (&page, &topic) in &assignment.page2topic {
        assert_eq!(topic, page % 2, "page {}", page);
    }
}

#[test]
fn topics_assign_to_themselves() {
    let assignment = run(&fixture_dumps(true));
    assert_eq!(assignment.page2topic[&0], 0);
    assert_eq!(assignment.page2topic[&1], 1);
}

#[test]
fn surviving_seeds_stay_with_their_topic() {
    let assignment = run(&fixture_dumps(true));
    // seed 4 belongs to both topics, so only the unambiguous ones are pinned
    assert_eq!(assignment.page2topic[&2], 0);
    assert_eq!(assignment.page2topic[&3], 1);
    assert_eq!(assignment.page2topic[&7], 1);
}

#[test]
fn the_namespaces_partition_the_assignment() {
    let assignment = run(&fixture_dumps(true));
    let namespaces = &assignment.namespaces;
    assert_eq!(namespaces.topics, vec![0, 1]);
    assert_eq!(namespaces.categories, vec![2, 3, 4]);
    assert_eq!(namespaces.articles, vec![5, 6, 7]);
    assert_eq!(
        assignment.page2topic.len(),
        namespaces.topics.len() + namespaces.categories.len() + namespaces.articles.len()
    );
}

#[test]
fn page_links_between_categorized_articles_change_nothing() {
    // every article here is categorized, so both page links are invalid and
    // the two runs must agree bit for bit
    let with = run(&fixture_dumps(true));
    let without = run(&fixture_dumps(false));
    assert_eq!(with.page2topic, without.page2topic);
}

#[test]
fn identical_runs_produce_identical_assignments() {
    let first = run(&fixture_dumps(true));
    let second = run(&fixture_dumps(true));
    assert_eq!(first.page2topic, second.page2topic);
    assert_eq!(first.namespaces.topics, second.namespaces.topics);
    assert_eq!(first.namespaces.categories, second.namespaces.categories);
    assert_eq!(first.namespaces.articles, second.namespaces.articles);
}

#[test]
fn uncategorized_articles_ride_page_links_into_a_topic() {
    // article 8 has no category; its only way in is the page link to Five
    let mut dumps = MemoryDumps::new();
    dumps.insert(
        "pagetable",
        "2,14,Two,x,x,0\n\
         3,14,Three,x,x,0\n\
         4,14,Four,x,x,0\n\
         5,0,Five,x,x,0\n\
         6,0,Six,x,x,0\n\
         7,0,Seven,x,x,0\n\
         8,0,Eight,x,x,0\n",
    );
    dumps.insert("redirecttable", "");
    dumps.insert(
        "categorylinkstable",
        "2,Four\n3,Four\n4,Two\n5,Three\n6,Two\n6,Four\n7,Three\n7,Four\n",
    );
    dumps.insert("pagelinkstable", "8,0,Five,0\n");

    let assignment = run(&dumps);
    assert!(assignment.namespaces.articles.contains(&8));
    // Five sits in topic 1, and 8 can only be absorbed through it
    assert_eq!(assignment.page2topic[&8], 1);
    assert_eq!(assignment.page2topic.len(), 9);
}

#[test]
fn redirects_collapse_onto_their_canonical_pages() {
    // "Historic" is a flagged redirect onto Two, and "Ancient" redirects
    // onto "Historic"; Six files itself under the dead titles and must land
    // on Two all the same
    let mut dumps = MemoryDumps::new();
    dumps.insert(
        "pagetable",
        "2,14,Two,x,x,0\n\
         3,14,Three,x,x,0\n\
         4,14,Four,x,x,0\n\
         5,0,Five,x,x,0\n\
         6,0,Six,x,x,0\n\
         7,0,Seven,x,x,0\n\
         8,14,Ancient,x,x,1\n\
         9,14,Historic,x,x,1\n",
    );
    dumps.insert("redirecttable", "9,14,Two\n8,14,Historic\n");
    dumps.insert(
        "categorylinkstable",
        "2,Four\n3,Four\n4,Historic\n5,Three\n6,Ancient\n6,Four\n7,Three\n7,Four\n",
    );
    dumps.insert("pagelinkstable", "");

    let assignment = run(&dumps);
    // the graph is the plain fixture's graph, so the assignment matches it
    let baseline = run(&fixture_dumps(false));
    assert_eq!(assignment.page2topic, baseline.page2topic);
    // the redirect pages themselves are nowhere to be seen
    for ghost in [8u32, 9] {
        assert!(!assignment.page2topic.contains_key(&ghost), "page {}", ghost);
        assert!(!assignment.namespaces.categories.contains(&ghost));
    }
}

#[test]
fn redirected_seeds_are_rejected() {
    // page 9 is a redirect row, so seeding a topic with it cannot work
    let mut dumps = fixture_dumps(false);
    dumps.insert(
        "pagetable",
        "2,14,Two,x,x,0\n\
         3,14,Three,x,x,0\n\
         4,14,Four,x,x,0\n\
         5,0,Five,x,x,0\n\
         6,0,Six,x,x,0\n\
         7,0,Seven,x,x,0\n\
         9,0,Nine,x,x,1\n",
    );
    let mut topics = seeds();
    topics.insert(1, vec![3, 4, 7, 9]);

    let tmp = tempfile::tempdir().expect("tempdir");
    let err = assign(
        &CancellationToken::new(),
        tmp.path(),
        &dumps,
        &topics,
        &[],
    )
    .expect_err("seeding with a redirect must fail");
    assert!(matches!(
        err,
        wikitopics::AssignError::Build(wikitopics::loader::BuildError::UnknownSeed(9))
    ));
}

#[test]
fn a_blacklist_filter_carves_out_a_subtree() {
    // blacklisting Three removes it and its direct members from the result
    let dumps = fixture_dumps(false);
    let filters = [wikitopics::types::Filter {
        is_whitelist: false,
        parents: vec![3],
        depth: 1,
    }];
    let tmp = tempfile::tempdir().expect("tempdir");
    let assignment = assign(
        &CancellationToken::new(),
        tmp.path(),
        &dumps,
        &seeds(),
        &filters,
    )
    .expect("assignment");

    for gone in [3u32, 5, 7] {
        assert!(!assignment.page2topic.contains_key(&gone), "page {}", gone);
    }
    assert_eq!(assignment.page2topic.len(), 5);
    // the survivors all lean on Two and Four, so they stay with topic 0
    assert_eq!(assignment.page2topic[&2], 0);
    assert_eq!(assignment.page2topic[&4], 0);
    assert_eq!(assignment.page2topic[&6], 0);
}
