pub mod core;
pub mod throttle;
pub mod source;
pub mod sink;
pub mod pipeline;
pub mod export;

/*
┌────────────────────────────────────────────────────────────────────────────────────────────┐
│                                 ESX INDEXING PIPELINE                                       │
└────────────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── SUPERVISOR ─────────────────────────────────────────────┐
│  struct Supervisor<W: BulkWriter>                                                            │
│  • config: Arc<IndexConfig>            // immutable, built once from the CLI                 │
│  • throttle: Arc<AdaptiveThrottle>     // the only state shared between workers              │
│  • cancel: CancellationToken           // first failure cancels every task                   │
│  • JoinSet<Result<()>>                 // producer + N workers, first error wins             │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

   DocumentSource ──► BatchAssembler ──► bounded queue (2N) ──► WorkerPool (N) ──► BulkWriter
   (JsonStreamSource,  (fixed-size,       (try_send, poll        (gate → bulk →    (ElasticClient,
    VecSource)          id-tagged)         while full)            collect/retry)    MemoryStore)
                                                                       │   ▲
                                                          elapsed ──►  ▼   │  backoff
                                                               ┌──────────────────┐
                                                               │ AdaptiveThrottle │
                                                               │ SlidingWindow(W) │
                                                               │ OLS y = m·x + b  │
                                                               │ F · pred² / L    │
                                                               └──────────────────┘

┌──────────────────────────────────────── CORE ───────────────────────────────────────────────┐
│  IndexConfig / ThrottleConfig   Document = Map<String, Value>   Batch { id, docs }          │
│  WriteMode { Index, Upsert }    Error { kind, context, failures }   PipelineStats           │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────────── EXPORT ─────────────────────────────────────────────┐
│  scroll::export — pages an index through the scroll API into newline-delimited JSON          │
└──────────────────────────────────────────────────────────────────────────────────────────────┘
*/
