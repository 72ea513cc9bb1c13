use yaml_rust::YamlLoader;

#[derive(Debug, Clone)]
pub struct Configure {
    pub(crate) peer_cnt: usize,
    pub(crate) peer: Vec<String>,
    pub(crate) index: usize,
    /// Seed for the replica's local rand source (timer jitter). Fixed per
    /// configuration so runs stay reproducible.
    pub(crate) rand_seed: u64,
}

impl Configure {
    pub fn new(peer_cnt: usize, peer: Vec<String>, index: usize, rand_seed: u64) -> Self {
        if (peer_cnt % 2) == 0 {
            panic!("The peer count should be odd, but we got {}", peer_cnt);
        }

        Self {
            peer_cnt,
            peer,
            index,
            rand_seed,
        }
    }

    pub fn peer_cnt(&self) -> usize {
        self.peer_cnt
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn peer_addr(&self, index: usize) -> Option<&str> {
        self.peer.get(index).map(String::as_str)
    }
}

pub trait ConfigureSrc {
    fn get_configure(&self) -> Configure;
}

/// Read Configure from a YAML document.
pub struct YamlConfigureSrc {
    yaml: String,
}

impl YamlConfigureSrc {
    pub fn new(yaml: &str) -> Self {
        Self {
            yaml: yaml.to_owned(),
        }
    }
}

impl ConfigureSrc for YamlConfigureSrc {
    fn get_configure(&self) -> Configure {
        let yaml = YamlLoader::load_from_str(&self.yaml).unwrap();
        if yaml.len() != 1 {
            panic!("We should only pass in a yaml file");
        }

        // have checked length
        let yaml = yaml.first().unwrap();

        let peer_cnt = yaml["peer_cnt"].as_i64().unwrap() as usize;

        let peer = yaml["peer"]
            .as_vec()
            .unwrap()
            .iter()
            .map(|y| y.as_str().unwrap().to_owned())
            .collect();

        let index = yaml["index"].as_i64().unwrap() as usize;

        let rand_seed = yaml["rand_seed"].as_i64().unwrap_or(index as i64 + 1) as u64;

        Configure::new(peer_cnt, peer, index, rand_seed)
    }
}
