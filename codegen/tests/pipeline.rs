//! End-to-end runs over in-memory WSDL documents: parse each source,
//! merge, and emit TypeScript declarations.

use soapts_codegen::{generate, EmitOptions, MergeOptions};
use soapts_wsdl::parse_str;

const CRM_WSDL: &str = r#"<?xml version="1.0"?>
<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
             xmlns:tns="http://example.com/crm"
             xmlns:xs="http://www.w3.org/2001/XMLSchema"
             targetNamespace="http://example.com/crm">
  <types>
    <xs:schema targetNamespace="http://example.com/crm">
      <xs:complexType name="Address">
        <xs:sequence>
          <xs:element name="street" type="xs:string"/>
          <xs:element name="city" type="xs:string"/>
          <xs:element name="zip" type="xs:string" minOccurs="0"/>
        </xs:sequence>
      </xs:complexType>
      <xs:complexType name="GetCustomerRequest">
        <xs:sequence>
          <xs:element name="id" type="xs:string"/>
        </xs:sequence>
      </xs:complexType>
      <xs:complexType name="GetCustomerResponse">
        <xs:sequence>
          <xs:element name="name" type="xs:string"/>
          <xs:element name="address" type="tns:Address"/>
        </xs:sequence>
      </xs:complexType>
    </xs:schema>
  </types>
  <message name="GetCustomerIn">
    <part name="parameters" type="tns:GetCustomerRequest"/>
  </message>
  <message name="GetCustomerOut">
    <part name="parameters" type="tns:GetCustomerResponse"/>
  </message>
  <portType name="CustomerPort">
    <operation name="GetCustomer">
      <input message="tns:GetCustomerIn"/>
      <output message="tns:GetCustomerOut"/>
    </operation>
  </portType>
</definitions>"#;

const BILLING_WSDL: &str = r#"<?xml version="1.0"?>
<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
             xmlns:tns="http://example.com/crm"
             xmlns:xs="http://www.w3.org/2001/XMLSchema"
             targetNamespace="http://example.com/crm">
  <types>
    <xs:schema targetNamespace="http://example.com/crm">
      <xs:complexType name="Address">
        <xs:sequence>
          <xs:element name="street" type="xs:string"/>
          <xs:element name="city" type="xs:string"/>
          <xs:element name="zip" type="xs:string" minOccurs="0"/>
        </xs:sequence>
      </xs:complexType>
      <xs:complexType name="GetInvoiceRequest">
        <xs:sequence>
          <xs:element name="number" type="xs:int"/>
        </xs:sequence>
      </xs:complexType>
      <xs:complexType name="GetInvoiceResponse">
        <xs:sequence>
          <xs:element name="total" type="xs:decimal"/>
          <xs:element name="billing" type="tns:Address"/>
        </xs:sequence>
      </xs:complexType>
    </xs:schema>
  </types>
  <message name="GetInvoiceIn">
    <part name="parameters" type="tns:GetInvoiceRequest"/>
  </message>
  <message name="GetInvoiceOut">
    <part name="parameters" type="tns:GetInvoiceResponse"/>
  </message>
  <portType name="BillingPort">
    <operation name="GetInvoice">
      <input message="tns:GetInvoiceIn"/>
      <output message="tns:GetInvoiceOut"/>
    </operation>
  </portType>
</definitions>"#;

#[test]
fn shared_types_merge_without_conflicts() {
    let crm = parse_str("crm.wsdl", CRM_WSDL).unwrap();
    let billing = parse_str("billing.wsdl", BILLING_WSDL).unwrap();

    let (files, merged) = generate(
        &[crm, billing],
        &MergeOptions::default(),
        &EmitOptions::default(),
    )
    .unwrap();

    assert!(merged.conflicts.is_empty());
    assert_eq!(merged.graph.len(), 5);

    let text = files
        .iter()
        .flat_map(|file| file.data.iter())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n");

    assert_eq!(text.matches("export interface Address {").count(), 1);
    assert!(text.contains(
        "export type GetCustomer = (input: GetCustomerRequest) => Promise<GetCustomerResponse>;"
    ));
    assert!(text.contains(
        "export type GetInvoice = (input: GetInvoiceRequest) => Promise<GetInvoiceResponse>;"
    ));
}

#[test]
fn parsing_the_same_document_twice_merges_to_the_same_graph() {
    let first = parse_str("crm.wsdl", CRM_WSDL).unwrap();
    let second = parse_str("crm.wsdl", CRM_WSDL).unwrap();
    let expected = first.graph.clone();

    let (_, merged) = generate(
        &[first, second],
        &MergeOptions::default(),
        &EmitOptions::default(),
    )
    .unwrap();

    assert!(merged.conflicts.is_empty());
    assert_eq!(merged.graph, expected);
}

#[test]
fn pipeline_output_is_deterministic() {
    let run = || {
        let crm = parse_str("crm.wsdl", CRM_WSDL).unwrap();
        let billing = parse_str("billing.wsdl", BILLING_WSDL).unwrap();
        generate(
            &[crm, billing],
            &MergeOptions::default(),
            &EmitOptions::default(),
        )
        .unwrap()
        .0
    };

    assert_eq!(run(), run());
}
