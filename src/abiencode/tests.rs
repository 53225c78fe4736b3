use super::{
    as_bytes,
    types::{Address, Bytes32, Hash, U256},
    *,
};
use serde::Serialize;

/*
Python code to split output from remix into chunks of 32 bytes, the annotations
are done manually.
```python
s = "..."
print(*(s[i:i+64] for i in range(0, len(s), 64)), sep="\n")
```
*/

// Each non-empty line of `expected` must start with one 32 byte slot as hex,
// anything after it is a comment.
fn serialize_and_compare<T>(value: &T, expected: &str)
where
    T: Serialize,
{
    let encoded = to_bytes(value).unwrap();
    let expected = expected
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            assert!(line.len() >= 64, "line too short: {line}");
            &line[..64]
        })
        .collect::<Vec<_>>();

    let actual = encoded.chunks(32).map(hex::encode).collect::<Vec<_>>();
    assert_eq!(actual, expected);
}

#[test]
fn uint_in_function_args() {
    serialize_and_compare(
        &0x1234u64,
        "0000000000000000000000000000000000000000000000000000000000001234",
    );
}

#[test]
fn negative_int_is_sign_extended() {
    serialize_and_compare(
        &-2i32,
        "fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe",
    );
}

#[test]
fn bool_values() {
    serialize_and_compare(
        &true,
        "0000000000000000000000000000000000000000000000000000000000000001",
    );
    serialize_and_compare(
        &false,
        "0000000000000000000000000000000000000000000000000000000000000000",
    );
}

#[test]
fn address_in_container() {
    // Random address from etherscan, do not use!
    let addr: Address = "0x95222290DD7278Aa3Ddd389Cc1E1d165CC4BAfe5".parse().unwrap();

    #[derive(Serialize, Debug)]
    struct AddrContainer {
        a: Address,
    }

    // Not a dynamic type => No 0x0000..0020 added in the beginning.
    serialize_and_compare(
        &AddrContainer { a: addr },
        "00000000000000000000000095222290dd7278aa3ddd389cc1e1d165cc4bafe5",
    );
}

#[test]
fn malformed_hex_is_rejected() {
    use super::types::ParseError;

    assert!(matches!(
        "0x95zz".parse::<Address>(),
        Err(ParseError::InvalidHex(_))
    ));
    assert_eq!(
        "0x9522".parse::<Address>(),
        Err(ParseError::InvalidLength {
            expected: 20,
            actual: 2
        })
    );
}

#[test]
fn dynamic_bytes() {
    /*
    ```solidity
        bytes memory d = "\xa1\xa2\xa3\xa4";
        return abi.encode(d);
    ```
    */
    #[derive(Serialize, Debug)]
    #[serde(transparent)]
    struct Bytes {
        #[serde(with = "as_bytes")]
        value: [u8; 4],
    }

    let expected = "
0000000000000000000000000000000000000000000000000000000000000020 // offset
    0000000000000000000000000000000000000000000000000000000000000004 // length
    a1a2a3a400000000000000000000000000000000000000000000000000000000 // data
    ";
    serialize_and_compare(
        &Bytes {
            value: [0xa1, 0xa2, 0xa3, 0xa4],
        },
        expected,
    );
}

#[test]
fn static_bytes32_is_left_aligned() {
    let mut v = [0u8; 32];
    v[0] = 0xab;
    serialize_and_compare(
        &Bytes32(v),
        "ab00000000000000000000000000000000000000000000000000000000000000",
    );
}

#[test]
fn staticstruct_in_fixedarray() {
    /*
    ```solidity
        struct StaticstructInFixedarrayInnerData {
            uint64 v;
        }
        struct StaticstructInFixedarrayData {
            StaticstructInFixedarrayInnerData[2] a;
            bytes b;
        }
        function StaticstructInFixedarray() public pure returns(bytes memory) {
            StaticstructInFixedarrayData memory d;
            d.a[0].v = 0xaa;
            d.a[1].v = 0xbb;
            d.b = "\x11\x22\x33\x44\x55";
            return abi.encode(d);
        }
    ```
    */

    // Not transparent because the struct exists on the solidity side, too
    #[derive(Serialize, Debug)]
    struct Inner(u64);

    #[derive(Serialize, Debug)]
    struct StaticstructInFixedarray {
        a: [Inner; 2],
        #[serde(with = "as_bytes")]
        b: Vec<u8>,
    }

    let d = StaticstructInFixedarray {
        a: [Inner(0xaa), Inner(0xbb)],
        b: vec![0x11, 0x22, 0x33, 0x44, 0x55],
    };

    let expected = "
0000000000000000000000000000000000000000000000000000000000000020 // d offset
    00000000000000000000000000000000000000000000000000000000000000aa // d.a[0].v
    00000000000000000000000000000000000000000000000000000000000000bb // d.a[1].v
    0000000000000000000000000000000000000000000000000000000000000060 // d.b offset
        0000000000000000000000000000000000000000000000000000000000000005 // d.b length
        1122334455000000000000000000000000000000000000000000000000000000 // d.b
    ";
    serialize_and_compare(&d, expected);
}

#[test]
fn nested_dynamic_arrays_and_strings() {
    /*
    g(uint256[][],string[]) wrapped in a struct
    */
    #[derive(Serialize, Debug)]
    struct Data(Vec<Vec<U256>>, Vec<&'static str>);

    let d = Data(
        vec![vec![1.into(), 2.into()], vec![3.into()]],
        vec!["one", "two", "three"],
    );

    let expected = "
0000000000000000000000000000000000000000000000000000000000000020 // struct offset
0000000000000000000000000000000000000000000000000000000000000040 // offset of [[1, 2], [3]]
0000000000000000000000000000000000000000000000000000000000000140 // offset of [\"one\", \"two\", \"three\"]
    0000000000000000000000000000000000000000000000000000000000000002 // count for [[1, 2], [3]]
    0000000000000000000000000000000000000000000000000000000000000040 // offset of [1, 2]
    00000000000000000000000000000000000000000000000000000000000000a0 // offset of [3]
        0000000000000000000000000000000000000000000000000000000000000002 // count for [1, 2]
        0000000000000000000000000000000000000000000000000000000000000001 // encoding of 1
        0000000000000000000000000000000000000000000000000000000000000002 // encoding of 2
        0000000000000000000000000000000000000000000000000000000000000001 // count for [3]
        0000000000000000000000000000000000000000000000000000000000000003 // encoding of 3
    0000000000000000000000000000000000000000000000000000000000000003 // count for strings
    0000000000000000000000000000000000000000000000000000000000000060 // offset for \"one\"
    00000000000000000000000000000000000000000000000000000000000000a0 // offset for \"two\"
    00000000000000000000000000000000000000000000000000000000000000e0 // offset for \"three\"
        0000000000000000000000000000000000000000000000000000000000000003 // count for \"one\"
        6f6e650000000000000000000000000000000000000000000000000000000000 // \"one\"
        0000000000000000000000000000000000000000000000000000000000000003 // count for \"two\"
        74776f0000000000000000000000000000000000000000000000000000000000 // \"two\"
        0000000000000000000000000000000000000000000000000000000000000005 // count for \"three\"
        7468726565000000000000000000000000000000000000000000000000000000 // \"three\"
    ";
    serialize_and_compare(&d, expected);
}

#[test]
fn floats_are_rejected() {
    assert_eq!(
        to_bytes(&1.5f64),
        Err(Error::TypeNotRepresentable("f64"))
    );
    assert!(to_bytes(&Some(1u8)).is_err());
}

/* Solidity: get_state_1A2P()
```solidity
function get_state_1A2P() internal pure returns(Channel.State memory) {
    Channel.State memory s;
    s.channelID = "1111";
    s.version = 0x2222;
    s.outcome.assets = new Channel.Asset[](1);
    s.outcome.assets[0].chainID = 0x3333;
    s.outcome.assets[0].holder = 0x5B38Da6a701c568545dCfcB03FcB875f56beddC4;
    s.outcome.balances = new uint256[][](1);
    s.outcome.balances[0] = new uint256[](2);
    s.outcome.balances[0][0] = 0x5555;
    s.outcome.balances[0][1] = 0x6666;
    s.appData = "";
    s.isFinal = true;
    return s;
}
```
*/
mod nested_state {
    use super::*;

    #[derive(Serialize, Debug)]
    struct Asset {
        chain_id: U256,
        holder: Address,
    }

    #[derive(Serialize, Debug)]
    struct Allocation {
        assets: Vec<Asset>,
        balances: Vec<Vec<U256>>,
        locked: Vec<Asset>,
    }

    #[derive(Serialize, Debug)]
    struct State {
        id: Hash,
        version: u64,
        outcome: Allocation,
        #[serde(with = "as_bytes")]
        app_data: Vec<u8>,
        is_final: bool,
    }

    fn build_test_state() -> State {
        // Random address from etherscan, do not use!
        let holder = "5B38Da6a701c568545dCfcB03FcB875f56beddC4".parse().unwrap();

        let mut id = [0u8; 32];
        id[..4].copy_from_slice(b"1111");

        State {
            id: Hash(id),
            version: 0x2222,
            outcome: Allocation {
                assets: vec![Asset {
                    chain_id: 0x3333.into(),
                    holder,
                }],
                balances: vec![vec![0x5555.into(), 0x6666.into()]],
                locked: vec![],
            },
            app_data: vec![],
            is_final: true,
        }
    }

    #[test]
    fn encode() {
        let expected = "
            0000000000000000000000000000000000000000000000000000000000000020
            3131313100000000000000000000000000000000000000000000000000000000
            0000000000000000000000000000000000000000000000000000000000002222
            00000000000000000000000000000000000000000000000000000000000000a0
            0000000000000000000000000000000000000000000000000000000000000220
            0000000000000000000000000000000000000000000000000000000000000001
            0000000000000000000000000000000000000000000000000000000000000060
            00000000000000000000000000000000000000000000000000000000000000c0
            0000000000000000000000000000000000000000000000000000000000000160
            0000000000000000000000000000000000000000000000000000000000000001
            0000000000000000000000000000000000000000000000000000000000003333
            0000000000000000000000005b38da6a701c568545dcfcb03fcb875f56beddc4
            0000000000000000000000000000000000000000000000000000000000000001
            0000000000000000000000000000000000000000000000000000000000000020
            0000000000000000000000000000000000000000000000000000000000000002
            0000000000000000000000000000000000000000000000000000000000005555
            0000000000000000000000000000000000000000000000000000000000006666
            0000000000000000000000000000000000000000000000000000000000000000
            0000000000000000000000000000000000000000000000000000000000000000
            ";

        serialize_and_compare(&build_test_state(), expected)
    }

    #[test]
    fn hash() {
        let expected: Hash = "0xe7518ad2414d38370ea5f21f1351eabce47480ab191c984ac12a3aedf70eda3d"
            .parse()
            .unwrap();
        assert_eq!(to_hash(&build_test_state()).unwrap(), expected);
    }
}
