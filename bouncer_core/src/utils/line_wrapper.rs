/// Iterator of strings that concatenates input items into lines of a given maximum length
///
/// The length is given in **bytes**. An item longer than the limit on its own
/// is emitted as a line by itself rather than split.
pub struct LineWrapper<const JOINER: char, Item: AsRef<str>, Iter: Iterator<Item = Item>> {
    line_length: usize,
    iter: Iter,
    buf: Option<String>,
}

impl<const JOINER: char, Item: AsRef<str>, Iter: Iterator<Item = Item>>
    LineWrapper<JOINER, Item, Iter>
{
    pub fn new(line_length: usize, mut iter: Iter) -> Self {
        LineWrapper {
            line_length,
            buf: iter.next().map(|item| {
                let mut buf = String::with_capacity(line_length);
                buf.push_str(item.as_ref());
                buf
            }),
            iter,
        }
    }
}

impl<const JOINER: char, Item: AsRef<str>, Iter: Iterator<Item = Item>> Iterator
    for LineWrapper<JOINER, Item, Iter>
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let buf = self.buf.as_mut()?;

        for item in self.iter.by_ref() {
            let item = item.as_ref();
            if buf.len() + JOINER.len_utf8() + item.len() <= self.line_length {
                buf.push(JOINER);
                buf.push_str(item);
            } else {
                // Line full; start the next one with this item
                let line = String::from(buf.as_str());
                buf.clear();
                buf.push_str(item);
                return Some(line);
            }
        }

        self.buf.take()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wraps_at_limit() {
        let items = ["a", "ab", "cde", "f", "ghi", "jklm", "nopqr"];

        assert_eq!(
            LineWrapper::<' ', _, _>::new(3, items.into_iter()).collect::<Vec<_>>(),
            vec!["a", "ab", "cde", "f", "ghi", "jklm", "nopqr"]
        );

        assert_eq!(
            LineWrapper::<' ', _, _>::new(5, items.into_iter()).collect::<Vec<_>>(),
            vec!["a ab", "cde f", "ghi", "jklm", "nopqr"]
        );

        assert_eq!(
            LineWrapper::<' ', _, _>::new(9, items.into_iter()).collect::<Vec<_>>(),
            vec!["a ab cde", "f ghi", "jklm", "nopqr"]
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(
            LineWrapper::<' ', _, _>::new(3, Vec::<&str>::new().into_iter()).collect::<Vec<_>>(),
            Vec::<String>::new()
        );
    }

    #[test]
    fn custom_joiner() {
        assert_eq!(
            LineWrapper::<',', _, _>::new(7, ["#a", "#b", "#c"].into_iter()).collect::<Vec<_>>(),
            vec!["#a,#b", "#c"]
        );
    }
}
