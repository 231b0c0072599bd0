// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Operator command line: a free-form string tokenized on whitespace.
//! Recognized tokens set their flag; unknown tokens are ignored.

/// The recognized boolean options.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub insecure: bool,
    pub noccst: bool,
    pub nocpst: bool,
    pub nodl: bool,
    pub nomktme: bool,
    pub nopcid: bool,
    pub nosmmu: bool,
    pub nouart: bool,
    pub novpid: bool,
}

impl Options {
    pub fn parse(cmdline: &str) -> Options {
        let mut options = Options::default();
        let table: [(&str, &mut bool); 9] = [
            ("insecure", &mut options.insecure),
            ("noccst", &mut options.noccst),
            ("nocpst", &mut options.nocpst),
            ("nodl", &mut options.nodl),
            ("nomktme", &mut options.nomktme),
            ("nopcid", &mut options.nopcid),
            ("nosmmu", &mut options.nosmmu),
            ("nouart", &mut options.nouart),
            ("novpid", &mut options.novpid),
        ];
        for token in cmdline.split_whitespace() {
            for (name, flag) in &table {
                if token == *name {
                    **flag = true;
                }
            }
        }
        options
    }

    /// The feature downgrades this command line requests.
    pub fn feature_filters(&self) -> cpu::x86::FeatureFilters {
        cpu::x86::FeatureFilters {
            nodl: self.nodl,
            nopcid: self.nopcid,
            nomktme: self.nomktme,
            noccst: self.noccst,
            nocpst: self.nocpst,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Options;

    #[test]
    fn tokens_set_flags() {
        let o = Options::parse("nodl nosmmu");
        assert!(o.nodl && o.nosmmu);
        assert!(!o.nopcid && !o.nouart && !o.insecure);
    }

    #[test]
    fn unknown_tokens_ignored() {
        let o = Options::parse("  verbose nodl\tnot-an-option  ");
        assert!(o.nodl);
        assert_eq!(
            o,
            Options {
                nodl: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn empty_line() {
        assert_eq!(Options::parse(""), Options::default());
    }

    #[test]
    fn no_partial_matches() {
        let o = Options::parse("nodlx xnodl");
        assert_eq!(o, Options::default());
    }
}
