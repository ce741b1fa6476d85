//! Lazy record sources over the dump tables.
//!
//! Each source pulls one record at a time, validates the table's minimum
//! width, and hands back a typed page or link. Namespacing quirks of the
//! individual tables (implicit category targets, swapped columns) are fixed
//! here so the loader never sees them.

use super::{
    DumpError, Dumps, CATEGORYLINKS_TABLE, PAGELINKS_TABLE, PAGE_TABLE, REDIRECT_TABLE,
};
use crate::types::{Link, LinkTarget, NamespaceID, Page, PageRecord, NS_ARTICLE, NS_CATEGORY};

use std::io::Read;

/// Streaming producer of graph nodes and alias titles.
pub trait PageSource {
    fn next(&mut self) -> Result<Option<PageRecord>, DumpError>;

    /// Releases the underlying stream. Idempotent.
    fn close(&mut self) -> Result<(), DumpError> {
        Ok(())
    }
}

/// Streaming producer of graph links.
pub trait LinkSource {
    fn next(&mut self) -> Result<Option<Link>, DumpError>;

    /// Releases the underlying stream. Idempotent.
    fn close(&mut self) -> Result<(), DumpError> {
        Ok(())
    }
}

/// One dump table as a stream of width-checked CSV records.
struct TableReader {
    table: &'static str,
    reader: csv::Reader<Box<dyn Read + Send>>,
    record: csv::StringRecord,
    min_fields: usize,
    closed: bool,
}

impl TableReader {
    fn open(dumps: &impl Dumps, table: &'static str, min_fields: usize) -> Result<Self, DumpError> {
        let raw = dumps.open(table)?;
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(raw);
        Ok(TableReader {
            table,
            reader,
            record: csv::StringRecord::new(),
            min_fields,
            closed: false,
        })
    }

    fn next(&mut self) -> Result<Option<&csv::StringRecord>, DumpError> {
        if self.closed {
            return Ok(None);
        }
        if !self.reader.read_record(&mut self.record)? {
            self.closed = true;
            return Ok(None);
        }
        if self.record.len() < self.min_fields {
            return Err(DumpError::Truncated {
                table: self.table,
                expected: self.min_fields,
                found: self.record.len(),
            });
        }
        Ok(Some(&self.record))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn parse_id(table: &'static str, what: &'static str, value: &str) -> Result<u32, DumpError> {
    value.parse().map_err(|_| DumpError::Field {
        table,
        what,
        value: value.to_string(),
    })
}

fn parse_namespace(
    table: &'static str,
    what: &'static str,
    value: &str,
) -> Result<NamespaceID, DumpError> {
    value.parse().map_err(|_| DumpError::Field {
        table,
        what,
        value: value.to_string(),
    })
}

/// Article and category rows of the page table.
///
/// Rows flagged as redirects come out as alias titles rather than nodes;
/// the redirect table supplies the edges that collapse them.
pub struct PageRecords {
    inner: TableReader,
}

impl PageRecords {
    pub fn open(dumps: &impl Dumps) -> Result<Self, DumpError> {
        Ok(PageRecords {
            inner: TableReader::open(dumps, PAGE_TABLE, 6)?,
        })
    }
}

impl PageSource for PageRecords {
    fn next(&mut self) -> Result<Option<PageRecord>, DumpError> {
        while let Some(record) = self.inner.next()? {
            let is_redirect = record.get(5) != Some("0");
            let id = parse_id(PAGE_TABLE, "page id", &record[0])?;
            let namespace = parse_namespace(PAGE_TABLE, "namespace", &record[1])?;
            let title = record[2].to_string();
            if namespace != NS_ARTICLE && namespace != NS_CATEGORY {
                continue;
            }
            let page = Page {
                id,
                namespace,
                title,
            };
            return Ok(Some(if is_redirect {
                PageRecord::Alias(page)
            } else {
                PageRecord::Node(page)
            }));
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<(), DumpError> {
        self.inner.close();
        Ok(())
    }
}

/// Redirect table rows as alias links.
pub struct RedirectRecords {
    inner: TableReader,
}

impl RedirectRecords {
    pub fn open(dumps: &impl Dumps) -> Result<Self, DumpError> {
        Ok(RedirectRecords {
            inner: TableReader::open(dumps, REDIRECT_TABLE, 3)?,
        })
    }
}

impl LinkSource for RedirectRecords {
    fn next(&mut self) -> Result<Option<Link>, DumpError> {
        match self.inner.next()? {
            Some(record) => {
                let from = parse_id(REDIRECT_TABLE, "source id", &record[0])?;
                let namespace = parse_namespace(REDIRECT_TABLE, "target namespace", &record[1])?;
                let title = record[2].to_string();
                Ok(Some(Link {
                    from,
                    to: LinkTarget::Title(namespace, title),
                }))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<(), DumpError> {
        self.inner.close();
        Ok(())
    }
}

/// Category membership rows. The table only names the target title; its
/// namespace is implicitly the category one.
pub struct CategoryLinkRecords {
    inner: TableReader,
}

impl CategoryLinkRecords {
    pub fn open(dumps: &impl Dumps) -> Result<Self, DumpError> {
        Ok(CategoryLinkRecords {
            inner: TableReader::open(dumps, CATEGORYLINKS_TABLE, 2)?,
        })
    }
}

impl LinkSource for CategoryLinkRecords {
    fn next(&mut self) -> Result<Option<Link>, DumpError> {
        match self.inner.next()? {
            Some(record) => {
                let from = parse_id(CATEGORYLINKS_TABLE, "source id", &record[0])?;
                let title = record[1].to_string();
                Ok(Some(Link {
                    from,
                    to: LinkTarget::Title(NS_CATEGORY, title),
                }))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<(), DumpError> {
        self.inner.close();
        Ok(())
    }
}

/// Internal link rows between articles. Target title and namespace sit in
/// swapped column order in this table.
pub struct PageLinkRecords {
    inner: TableReader,
}

impl PageLinkRecords {
    pub fn open(dumps: &impl Dumps) -> Result<Self, DumpError> {
        Ok(PageLinkRecords {
            inner: TableReader::open(dumps, PAGELINKS_TABLE, 4)?,
        })
    }
}

impl LinkSource for PageLinkRecords {
    fn next(&mut self) -> Result<Option<Link>, DumpError> {
        match self.inner.next()? {
            Some(record) => {
                let from = parse_id(PAGELINKS_TABLE, "source id", &record[0])?;
                let namespace = parse_namespace(PAGELINKS_TABLE, "target namespace", &record[3])?;
                let title = record[2].to_string();
                Ok(Some(Link {
                    from,
                    to: LinkTarget::Title(namespace, title),
                }))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<(), DumpError> {
        self.inner.close();
        Ok(())
    }
}

/// In-memory page source for synthetic nodes.
pub struct PageSlice {
    records: std::vec::IntoIter<PageRecord>,
}

impl PageSlice {
    pub fn new(records: Vec<PageRecord>) -> Self {
        PageSlice {
            records: records.into_iter(),
        }
    }
}

impl PageSource for PageSlice {
    fn next(&mut self) -> Result<Option<PageRecord>, DumpError> {
        Ok(self.records.next())
    }
}

/// In-memory link source for synthetic edges.
pub struct LinkSlice {
    links: std::vec::IntoIter<Link>,
}

impl LinkSlice {
    pub fn new(links: Vec<Link>) -> Self {
        LinkSlice {
            links: links.into_iter(),
        }
    }
}

impl LinkSource for LinkSlice {
    fn next(&mut self) -> Result<Option<Link>, DumpError> {
        Ok(self.links.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::MemoryDumps;

    fn dumps_with(name: &str, csv: &str) -> MemoryDumps {
        let mut dumps = MemoryDumps::new();
        dumps.insert(name, csv);
        dumps
    }

    fn drain_pages(mut source: impl PageSource) -> Vec<PageRecord> {
        let mut records = Vec::new();
        while let Some(record) = source.next().expect("page record") {
            records.push(record);
        }
        records
    }

    #[test]
    fn page_records_split_nodes_from_redirect_aliases() {
        let dumps = dumps_with(
            PAGE_TABLE,
            "1,0,Alpha,x,x,0\n2,0,Beta,x,x,1\n3,2,User page,x,x,0\n4,14,Gamma,x,x,0\n",
        );
        let records = drain_pages(PageRecords::open(&dumps).expect("open"));
        assert_eq!(
            records,
            vec![
                PageRecord::Node(Page {
                    id: 1,
                    namespace: NS_ARTICLE,
                    title: "Alpha".to_string()
                }),
                PageRecord::Alias(Page {
                    id: 2,
                    namespace: NS_ARTICLE,
                    title: "Beta".to_string()
                }),
                PageRecord::Node(Page {
                    id: 4,
                    namespace: NS_CATEGORY,
                    title: "Gamma".to_string()
                }),
            ]
        );
    }

    #[test]
    fn page_records_keep_quoted_titles_intact() {
        let dumps = dumps_with(PAGE_TABLE, "1,0,\"Hello, world\",x,x,0\n");
        let records = drain_pages(PageRecords::open(&dumps).expect("open"));
        assert_eq!(
            records,
            vec![PageRecord::Node(Page {
                id: 1,
                namespace: NS_ARTICLE,
                title: "Hello, world".to_string()
            })]
        );
    }

    #[test]
    fn truncated_page_rows_are_fatal() {
        let dumps = dumps_with(PAGE_TABLE, "1,0,Alpha\n");
        let mut source = PageRecords::open(&dumps).expect("open");
        assert!(matches!(
            source.next(),
            Err(DumpError::Truncated {
                expected: 6,
                found: 3,
                ..
            })
        ));
    }

    #[test]
    fn non_numeric_ids_are_fatal() {
        let dumps = dumps_with(PAGE_TABLE, "one,0,Alpha,x,x,0\n");
        let mut source = PageRecords::open(&dumps).expect("open");
        assert!(matches!(source.next(), Err(DumpError::Field { .. })));
    }

    #[test]
    fn category_links_force_the_category_namespace() {
        let dumps = dumps_with(CATEGORYLINKS_TABLE, "7,Science\n");
        let mut source = CategoryLinkRecords::open(&dumps).expect("open");
        let link = source.next().expect("record").expect("one link");
        assert_eq!(link.from, 7);
        assert_eq!(
            link.to,
            LinkTarget::Title(NS_CATEGORY, "Science".to_string())
        );
    }

    #[test]
    fn page_links_read_the_swapped_columns() {
        let dumps = dumps_with(PAGELINKS_TABLE, "7,0,Physics,0\n");
        let mut source = PageLinkRecords::open(&dumps).expect("open");
        let link = source.next().expect("record").expect("one link");
        assert_eq!(link.from, 7);
        assert_eq!(link.to, LinkTarget::Title(NS_ARTICLE, "Physics".to_string()));
    }

    #[test]
    fn close_is_idempotent_and_ends_the_stream() {
        let dumps = dumps_with(REDIRECT_TABLE, "1,0,Target\n2,0,Target\n");
        let mut source = RedirectRecords::open(&dumps).expect("open");
        assert!(source.next().expect("record").is_some());
        source.close().expect("close");
        source.close().expect("close again");
        assert!(source.next().expect("record").is_none());
    }

    #[test]
    fn missing_tables_are_reported_by_name() {
        let dumps = MemoryDumps::new();
        assert!(matches!(
            PageRecords::open(&dumps),
            Err(DumpError::UnknownTable(name)) if name == PAGE_TABLE
        ));
    }
}
