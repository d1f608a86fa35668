use crate::statement::Statement;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: u64,
    pub statements: Vec<Statement>,
    pub byte_size: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub max_statements: usize,
    pub max_bytes: usize,
}

impl ChunkLimits {
    pub fn new(max_statements: usize, max_bytes: usize) -> Self {
        Self {
            max_statements: max_statements.max(1),
            max_bytes: max_bytes.max(1),
        }
    }
}

/// Groups statements into chunks without ever splitting one.
///
/// A chunk is closed when the next statement would push it past either
/// bound, so an oversized statement ends up alone in its own chunk.
pub struct ChunkBuilder {
    limits: ChunkLimits,
    next_id: u64,
    current: Vec<Statement>,
    current_bytes: usize,
}

impl ChunkBuilder {
    pub fn new(limits: ChunkLimits) -> Self {
        Self {
            limits: ChunkLimits::new(limits.max_statements, limits.max_bytes),
            next_id: 0,
            current: Vec::new(),
            current_bytes: 0,
        }
    }

    /// Add a statement; returns the previous chunk if this one did not fit.
    pub fn push(&mut self, stmt: Statement) -> Option<Chunk> {
        let size = stmt.byte_len();
        let closed = if !self.current.is_empty()
            && (self.current.len() >= self.limits.max_statements
                || self.current_bytes.saturating_add(size) > self.limits.max_bytes)
        {
            self.take()
        } else {
            None
        };
        self.current_bytes += size;
        self.current.push(stmt);
        closed
    }

    /// Close whatever is buffered.
    pub fn finish(&mut self) -> Option<Chunk> {
        self.take()
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.next_id
    }

    fn take(&mut self) -> Option<Chunk> {
        if self.current.is_empty() {
            return None;
        }
        let chunk = Chunk {
            id: self.next_id,
            statements: std::mem::take(&mut self.current),
            byte_size: self.current_bytes,
        };
        self.next_id += 1;
        self.current_bytes = 0;
        Some(chunk)
    }
}

/// Iterator adapter over [`ChunkBuilder`].
pub struct Chunker<I> {
    inner: I,
    builder: ChunkBuilder,
    done: bool,
}

impl<I: Iterator<Item = Statement>> Chunker<I> {
    pub fn new(inner: I, limits: ChunkLimits) -> Self {
        Self {
            inner,
            builder: ChunkBuilder::new(limits),
            done: false,
        }
    }
}

impl<I: Iterator<Item = Statement>> Iterator for Chunker<I> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        for stmt in self.inner.by_ref() {
            if let Some(chunk) = self.builder.push(stmt) {
                return Some(chunk);
            }
        }
        self.done = true;
        self.builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmts(sizes: &[usize]) -> Vec<Statement> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| Statement::new("x".repeat(n), i as u64 + 1, i as u64 + 1))
            .collect()
    }

    #[test]
    fn splits_by_statement_count() {
        let chunks: Vec<Chunk> =
            Chunker::new(stmts(&[1, 1, 1, 1, 1]).into_iter(), ChunkLimits::new(2, 1024)).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 2);
        assert_eq!(chunks[2].len(), 1);
        let ids: Vec<u64> = chunks.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn splits_by_byte_size() {
        let chunks: Vec<Chunk> =
            Chunker::new(stmts(&[4, 4, 4, 2]).into_iter(), ChunkLimits::new(100, 10)).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].byte_size, 8);
        assert_eq!(chunks[1].byte_size, 6);
        assert!(chunks.iter().all(|c| c.byte_size <= 10));
    }

    #[test]
    fn oversized_statement_gets_its_own_chunk() {
        let chunks: Vec<Chunk> =
            Chunker::new(stmts(&[3, 50, 3]).into_iter(), ChunkLimits::new(100, 10)).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].len(), 1);
        assert_eq!(chunks[1].byte_size, 50);
    }

    #[test]
    fn preserves_statement_order_and_ownership() {
        let input = stmts(&[1, 2, 3, 4, 5, 6, 7]);
        let chunks: Vec<Chunk> =
            Chunker::new(input.clone().into_iter(), ChunkLimits::new(3, 1024)).collect();
        let flattened: Vec<Statement> = chunks.into_iter().flat_map(|c| c.statements).collect();
        assert_eq!(flattened, input);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let mut builder = ChunkBuilder::new(ChunkLimits::new(0, 0));
        assert!(builder.finish().is_none());
        assert_eq!(builder.chunks_emitted(), 0);
    }
}
